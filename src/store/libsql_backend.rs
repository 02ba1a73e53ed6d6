//! libSQL backend: async `CampaignStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaign::model::{
    Campaign, CampaignParts, CampaignStatus, CampaignSummary, DataQuality, MessageDraft, Target,
};
use crate::error::DatabaseError;
use crate::followup::model::{ActionStatus, FollowUpAction, FollowUpRule, RuleStatus};
use crate::store::migrations;
use crate::store::traits::{CampaignStore, STALE_CLAIM_ERROR};

/// libSQL database backend.
///
/// One connection reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad {what} id '{s}': {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn data_quality_str(q: DataQuality) -> &'static str {
    match q {
        DataQuality::High => "high",
        DataQuality::Medium => "medium",
        DataQuality::Low => "low",
    }
}

fn str_to_data_quality(s: &str) -> DataQuality {
    match s {
        "high" => DataQuality::High,
        "medium" => DataQuality::Medium,
        _ => DataQuality::Low,
    }
}

const TARGET_COLUMNS: &str = "id, name, title, company, contact_handle, location, relevance_score, data_quality, discovered_at";

const MESSAGE_COLUMNS: &str = "id, target_id, channel, subject, body, tone, personalization, quality_score, status, status_history, template_id, follow_up, last_error, transport_id, created_at, updated_at";

const RULE_COLUMNS: &str = "id, campaign_id, trigger_type, delay_hours, body_template, tone, max_attempts, status, created_at";

const ACTION_COLUMNS: &str = "id, rule_id, campaign_id, message_id, trigger_type, scheduled_at, status, attempt_number, follow_up_message_id, last_error, created_at, updated_at";

fn row_to_target(row: &libsql::Row) -> Result<Target, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("target row parse: {e}"));
    let id: String = row.get(0).map_err(err)?;
    let discovered: String = row.get(8).map_err(err)?;
    Ok(Target {
        id: parse_uuid(&id, "target")?,
        name: row.get(1).map_err(err)?,
        title: row.get::<String>(2).ok(),
        company: row.get::<String>(3).ok(),
        contact_handle: row.get::<String>(4).ok(),
        location: row.get::<String>(5).ok(),
        relevance_score: row.get::<f64>(6).map_err(err)? as f32,
        data_quality: str_to_data_quality(&row.get::<String>(7).map_err(err)?),
        discovered_at: parse_datetime(&discovered)?,
    })
}

fn row_to_message(row: &libsql::Row) -> Result<MessageDraft, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("message row parse: {e}"));
    let id: String = row.get(0).map_err(err)?;
    let target_id: String = row.get(1).map_err(err)?;
    let channel: String = row.get(2).map_err(err)?;
    let tone: String = row.get(5).map_err(err)?;
    let personalization: String = row.get(6).map_err(err)?;
    let status: String = row.get(8).map_err(err)?;
    let history: String = row.get(9).map_err(err)?;
    let follow_up = row.get::<String>(11).ok();
    let created: String = row.get(14).map_err(err)?;
    let updated: String = row.get(15).map_err(err)?;

    Ok(MessageDraft {
        id: parse_uuid(&id, "message")?,
        target_id: parse_uuid(&target_id, "target")?,
        channel: channel.parse().map_err(DatabaseError::Serialization)?,
        subject: row.get::<String>(3).ok(),
        body: row.get(4).map_err(err)?,
        tone: tone.parse().map_err(DatabaseError::Serialization)?,
        personalization: from_json(&personalization, "personalization")?,
        quality_score: row.get::<f64>(7).map_err(err)? as f32,
        status: status.parse().map_err(DatabaseError::Serialization)?,
        status_history: from_json(&history, "status_history")?,
        template_id: row.get::<String>(10).unwrap_or_default(),
        follow_up: follow_up
            .as_deref()
            .map(|s| from_json(s, "follow_up"))
            .transpose()?,
        last_error: row.get::<String>(12).ok(),
        transport_id: row.get::<String>(13).ok(),
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
    })
}

fn row_to_rule(row: &libsql::Row) -> Result<FollowUpRule, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("rule row parse: {e}"));
    let id: String = row.get(0).map_err(err)?;
    let campaign_id: String = row.get(1).map_err(err)?;
    let trigger: String = row.get(2).map_err(err)?;
    let tone: String = row.get(5).map_err(err)?;
    let status: String = row.get(7).map_err(err)?;
    let created: String = row.get(8).map_err(err)?;
    Ok(FollowUpRule {
        id: parse_uuid(&id, "rule")?,
        campaign_id: parse_uuid(&campaign_id, "campaign")?,
        trigger: trigger.parse().map_err(DatabaseError::Serialization)?,
        delay_hours: row.get::<i64>(3).map_err(err)? as u32,
        body_template: row.get::<String>(4).ok(),
        tone: tone.parse().map_err(DatabaseError::Serialization)?,
        max_attempts: row.get::<i64>(6).map_err(err)? as u32,
        status: status.parse().map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created)?,
    })
}

fn row_to_action(row: &libsql::Row) -> Result<FollowUpAction, DatabaseError> {
    let err = |e: libsql::Error| DatabaseError::Query(format!("action row parse: {e}"));
    let id: String = row.get(0).map_err(err)?;
    let rule_id: String = row.get(1).map_err(err)?;
    let campaign_id: String = row.get(2).map_err(err)?;
    let message_id: String = row.get(3).map_err(err)?;
    let trigger: String = row.get(4).map_err(err)?;
    let scheduled: String = row.get(5).map_err(err)?;
    let status: String = row.get(6).map_err(err)?;
    let follow_up_message_id = row
        .get::<String>(8)
        .ok()
        .map(|s| parse_uuid(&s, "follow-up message"))
        .transpose()?;
    let created: String = row.get(10).map_err(err)?;
    let updated: String = row.get(11).map_err(err)?;
    Ok(FollowUpAction {
        id: parse_uuid(&id, "action")?,
        rule_id: parse_uuid(&rule_id, "rule")?,
        campaign_id: parse_uuid(&campaign_id, "campaign")?,
        message_id: parse_uuid(&message_id, "message")?,
        trigger: trigger.parse().map_err(DatabaseError::Serialization)?,
        scheduled_at: parse_datetime(&scheduled)?,
        status: status.parse().map_err(DatabaseError::Serialization)?,
        attempt_number: row.get::<i64>(7).map_err(err)? as u32,
        follow_up_message_id,
        last_error: row.get::<String>(9).ok(),
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
    })
}

/// Upsert one message on any connection (plain or inside a transaction).
async fn upsert_message(
    conn: &Connection,
    campaign_id: Uuid,
    m: &MessageDraft,
) -> Result<(), DatabaseError> {
    let follow_up = m.follow_up.as_ref().map(to_json).transpose()?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO messages (campaign_id, {MESSAGE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            campaign_id.to_string(),
            m.id.to_string(),
            m.target_id.to_string(),
            m.channel.to_string(),
            opt_text(m.subject.as_deref()),
            m.body.as_str(),
            m.tone.to_string(),
            to_json(&m.personalization)?,
            m.quality_score as f64,
            m.status.to_string(),
            to_json(&m.status_history)?,
            m.template_id.as_str(),
            opt_text(follow_up.as_deref()),
            opt_text(m.last_error.as_deref()),
            opt_text(m.transport_id.as_deref()),
            m.created_at.to_rfc3339(),
            m.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("save_message: {e}")))?;
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl CampaignStore for LibSqlBackend {
    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_campaign begin: {e}")))?;

        tx.execute(
            "INSERT OR REPLACE INTO campaigns (id, name, user_id, intent, channel, channel_rationale, settings, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                campaign.id.to_string(),
                campaign.name.as_str(),
                opt_text(campaign.user_id.as_deref()),
                to_json(&campaign.intent)?,
                campaign.intent.channel.to_string(),
                campaign.channel_rationale.as_str(),
                to_json(&campaign.settings)?,
                campaign.status.to_string(),
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_campaign: {e}")))?;

        for (position, t) in campaign.targets().iter().enumerate() {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO targets (campaign_id, position, {TARGET_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    campaign.id.to_string(),
                    position as i64,
                    t.id.to_string(),
                    t.name.as_str(),
                    opt_text(t.title.as_deref()),
                    opt_text(t.company.as_deref()),
                    opt_text(t.contact_handle.as_deref()),
                    opt_text(t.location.as_deref()),
                    t.relevance_score as f64,
                    data_quality_str(t.data_quality),
                    t.discovered_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_campaign target: {e}")))?;
        }

        for m in campaign.messages() {
            upsert_message(&tx, campaign.id, m).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("save_campaign commit: {e}")))?;

        debug!(
            campaign_id = %campaign.id,
            targets = campaign.targets().len(),
            messages = campaign.messages().len(),
            "Campaign persisted"
        );
        Ok(())
    }

    async fn load_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, name, user_id, intent, channel_rationale, settings, status, created_at, updated_at FROM campaigns WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_campaign: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("load_campaign: {e}"))),
        };
        let err = |e: libsql::Error| DatabaseError::Query(format!("load_campaign row parse: {e}"));
        let name: String = row.get(1).map_err(err)?;
        let user_id = row.get::<String>(2).ok();
        let intent: String = row.get(3).map_err(err)?;
        let rationale: String = row.get::<String>(4).unwrap_or_default();
        let settings: String = row.get(5).map_err(err)?;
        let status: String = row.get(6).map_err(err)?;
        let created: String = row.get(7).map_err(err)?;
        let updated: String = row.get(8).map_err(err)?;

        let mut targets = Vec::new();
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE campaign_id = ?1 ORDER BY position"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_campaign targets: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_campaign targets: {e}")))?
        {
            targets.push(row_to_target(&row)?);
        }

        let mut messages = Vec::new();
        let mut rows = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE campaign_id = ?1 ORDER BY created_at, rowid"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_campaign messages: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_campaign messages: {e}")))?
        {
            messages.push(row_to_message(&row)?);
        }

        Ok(Some(Campaign::from(CampaignParts {
            id,
            name,
            user_id,
            intent: from_json(&intent, "intent")?,
            channel_rationale: rationale,
            targets,
            messages,
            settings: from_json(&settings, "settings")?,
            status: status.parse().map_err(DatabaseError::Serialization)?,
            created_at: parse_datetime(&created)?,
            updated_at: parse_datetime(&updated)?,
        })))
    }

    async fn list_campaigns(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CampaignSummary>, DatabaseError> {
        let conn = self.conn();
        let sql = "SELECT c.id, c.name, c.status, c.channel, c.created_at, \
                   (SELECT COUNT(*) FROM messages m WHERE m.campaign_id = c.id) \
                   FROM campaigns c \
                   WHERE (?1 IS NULL OR c.user_id = ?1) \
                   ORDER BY c.created_at DESC LIMIT ?2";
        let mut rows = conn
            .query(sql, params![opt_text(user_id), limit as i64])
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_campaigns: {e}")))?
        {
            let err = |e: libsql::Error| DatabaseError::Query(format!("list_campaigns row parse: {e}"));
            let id: String = row.get(0).map_err(err)?;
            let status: String = row.get(2).map_err(err)?;
            let channel: String = row.get(3).map_err(err)?;
            let created: String = row.get(4).map_err(err)?;
            out.push(CampaignSummary {
                id: parse_uuid(&id, "campaign")?,
                name: row.get(1).map_err(err)?,
                status: status.parse().map_err(DatabaseError::Serialization)?,
                channel: channel.parse().map_err(DatabaseError::Serialization)?,
                total_messages: row.get::<i64>(5).map_err(err)? as usize,
                created_at: parse_datetime(&created)?,
            });
        }
        Ok(out)
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_campaign_status: {e}")))?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "campaign".into(),
                id: id.to_string(),
            });
        }
        debug!(campaign_id = %id, status = %status, "Campaign status updated in DB");
        Ok(())
    }

    async fn save_message(
        &self,
        campaign_id: Uuid,
        message: &MessageDraft,
    ) -> Result<(), DatabaseError> {
        upsert_message(self.conn(), campaign_id, message).await?;
        debug!(message_id = %message.id, status = %message.status, "Message saved");
        Ok(())
    }

    async fn insert_rule(&self, rule: &FollowUpRule) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO follow_up_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    rule.id.to_string(),
                    rule.campaign_id.to_string(),
                    rule.trigger.to_string(),
                    i64::from(rule.delay_hours),
                    opt_text(rule.body_template.as_deref()),
                    rule.tone.to_string(),
                    i64::from(rule.max_attempts),
                    rule.status.to_string(),
                    rule.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_rule: {e}")))?;
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<FollowUpRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM follow_up_rules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_rule(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rule: {e}"))),
        }
    }

    async fn list_rules(&self, campaign_id: Option<Uuid>) -> Result<Vec<FollowUpRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM follow_up_rules \
                     WHERE (?1 IS NULL OR campaign_id = ?1) ORDER BY created_at"
                ),
                params![opt_text(campaign_id.map(|id| id.to_string()).as_deref())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rules: {e}")))?;
        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rules: {e}")))?
        {
            rules.push(row_to_rule(&row)?);
        }
        Ok(rules)
    }

    async fn update_rule_status(&self, id: Uuid, status: RuleStatus) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE follow_up_rules SET status = ?1 WHERE id = ?2",
                params![status.to_string(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule_status: {e}")))?;
        Ok(())
    }

    async fn insert_action(&self, action: &FollowUpAction) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO follow_up_actions ({ACTION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    action.id.to_string(),
                    action.rule_id.to_string(),
                    action.campaign_id.to_string(),
                    action.message_id.to_string(),
                    action.trigger.to_string(),
                    action.scheduled_at.to_rfc3339(),
                    action.status.to_string(),
                    i64::from(action.attempt_number),
                    opt_text(action.follow_up_message_id.map(|id| id.to_string()).as_deref()),
                    opt_text(action.last_error.as_deref()),
                    action.created_at.to_rfc3339(),
                    action.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_action: {e}")))?;
        Ok(())
    }

    async fn list_actions(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<FollowUpAction>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM follow_up_actions \
                     WHERE rule_id = ?1 AND message_id = ?2 ORDER BY attempt_number"
                ),
                params![rule_id.to_string(), message_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_actions: {e}")))?;
        let mut actions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_actions: {e}")))?
        {
            actions.push(row_to_action(&row)?);
        }
        Ok(actions)
    }

    async fn list_due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpAction>, DatabaseError> {
        // RFC 3339 strings in UTC sort lexicographically.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM follow_up_actions \
                     WHERE status = 'pending' AND scheduled_at <= ?1 \
                     ORDER BY scheduled_at LIMIT ?2"
                ),
                params![now.to_rfc3339(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_due_actions: {e}")))?;
        let mut actions = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_due_actions: {e}")))?
        {
            actions.push(row_to_action(&row)?);
        }
        Ok(actions)
    }

    async fn claim_action(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE follow_up_actions SET status = 'in_flight', updated_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                params![now.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_action: {e}")))?;
        Ok(changed == 1)
    }

    async fn finish_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        follow_up_message_id: Option<Uuid>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE follow_up_actions SET status = ?1, \
                 follow_up_message_id = COALESCE(?2, follow_up_message_id), \
                 last_error = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    status.to_string(),
                    opt_text(follow_up_message_id.map(|id| id.to_string()).as_deref()),
                    opt_text(error),
                    now.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("finish_action: {e}")))?;
        Ok(())
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE follow_up_actions SET status = 'failed', last_error = ?1, updated_at = ?2 \
                 WHERE status = 'in_flight' AND updated_at < ?3",
                params![STALE_CLAIM_ERROR, now.to_rfc3339(), claimed_before.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_stale_claims: {e}")))?;
        Ok(changed as usize)
    }

    async fn complete_rule_instance(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO follow_up_rule_instances (rule_id, message_id, completed_at) VALUES (?1, ?2, ?3)",
                params![rule_id.to_string(), message_id.to_string(), now.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_rule_instance: {e}")))?;
        Ok(())
    }

    async fn is_rule_instance_completed(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM follow_up_rule_instances WHERE rule_id = ?1 AND message_id = ?2",
                params![rule_id.to_string(), message_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_rule_instance_completed: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("is_rule_instance_completed: {e}")))?;
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_rule_instance_completed: {e}"))),
        }
    }
}
