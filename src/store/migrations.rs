//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "campaigns",
        sql: r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                user_id TEXT,
                intent TEXT NOT NULL,
                channel TEXT NOT NULL,
                channel_rationale TEXT NOT NULL DEFAULT '',
                settings TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_campaigns_user ON campaigns(user_id);
            CREATE INDEX IF NOT EXISTS idx_campaigns_created ON campaigns(created_at);

            CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                title TEXT,
                company TEXT,
                contact_handle TEXT,
                location TEXT,
                relevance_score REAL NOT NULL,
                data_quality TEXT NOT NULL,
                discovered_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_targets_campaign ON targets(campaign_id);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                target_id TEXT NOT NULL REFERENCES targets(id),
                channel TEXT NOT NULL,
                subject TEXT,
                body TEXT NOT NULL,
                tone TEXT NOT NULL,
                personalization TEXT NOT NULL,
                quality_score REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                status_history TEXT NOT NULL,
                template_id TEXT NOT NULL DEFAULT '',
                last_error TEXT,
                transport_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_campaign ON messages(campaign_id);
            CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(status);
        "#,
    },
    Migration {
        version: 2,
        name: "follow_ups",
        sql: r#"
            ALTER TABLE messages ADD COLUMN follow_up TEXT;

            CREATE TABLE IF NOT EXISTS follow_up_rules (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL REFERENCES campaigns(id),
                trigger_type TEXT NOT NULL,
                delay_hours INTEGER NOT NULL,
                body_template TEXT,
                tone TEXT NOT NULL,
                max_attempts INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_campaign ON follow_up_rules(campaign_id);

            CREATE TABLE IF NOT EXISTS follow_up_actions (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL REFERENCES follow_up_rules(id),
                campaign_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempt_number INTEGER NOT NULL,
                follow_up_message_id TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (rule_id, message_id, attempt_number)
            );
            CREATE INDEX IF NOT EXISTS idx_actions_due ON follow_up_actions(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_actions_pair ON follow_up_actions(rule_id, message_id);

            CREATE TABLE IF NOT EXISTS follow_up_rule_instances (
                rule_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (rule_id, message_id)
            );
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
