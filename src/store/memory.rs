//! In-process `CampaignStore` used by tests and when no database is wanted.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::campaign::model::{Campaign, CampaignParts, CampaignStatus, CampaignSummary, MessageDraft};
use crate::error::DatabaseError;
use crate::followup::model::{ActionStatus, FollowUpAction, FollowUpRule, RuleStatus};
use crate::store::traits::{CampaignStore, STALE_CLAIM_ERROR};

#[derive(Default)]
struct Tables {
    campaigns: HashMap<Uuid, Campaign>,
    rules: HashMap<Uuid, FollowUpRule>,
    actions: Vec<FollowUpAction>,
    completed_instances: HashSet<(Uuid, Uuid)>,
}

/// Everything in one lock, so claims are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &str, id: Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError> {
        self.tables
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn load_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        Ok(self.tables.read().await.campaigns.get(&id).cloned())
    }

    async fn list_campaigns(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CampaignSummary>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut out: Vec<_> = tables
            .campaigns
            .values()
            .filter(|c| user_id.is_none() || c.user_id.as_deref() == user_id)
            .map(CampaignSummary::from)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| not_found("campaign", id))?;
        campaign.set_status(status);
        Ok(())
    }

    async fn save_message(
        &self,
        campaign_id: Uuid,
        message: &MessageDraft,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        let campaign = tables
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| not_found("campaign", campaign_id))?;

        // Rebuild through the parts so stats stay derived.
        let mut messages = campaign.messages().to_vec();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        let rebuilt = Campaign::from(CampaignParts {
            id: campaign.id,
            name: campaign.name.clone(),
            user_id: campaign.user_id.clone(),
            intent: campaign.intent.clone(),
            channel_rationale: campaign.channel_rationale.clone(),
            targets: campaign.targets().to_vec(),
            messages,
            settings: campaign.settings.clone(),
            status: campaign.status,
            created_at: campaign.created_at,
            updated_at: Utc::now(),
        });
        *campaign = rebuilt;
        Ok(())
    }

    async fn insert_rule(&self, rule: &FollowUpRule) -> Result<(), DatabaseError> {
        self.tables.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<FollowUpRule>, DatabaseError> {
        Ok(self.tables.read().await.rules.get(&id).cloned())
    }

    async fn list_rules(&self, campaign_id: Option<Uuid>) -> Result<Vec<FollowUpRule>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut rules: Vec<_> = tables
            .rules
            .values()
            .filter(|r| campaign_id.is_none_or(|id| r.campaign_id == id))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }

    async fn update_rule_status(&self, id: Uuid, status: RuleStatus) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        let rule = tables.rules.get_mut(&id).ok_or_else(|| not_found("rule", id))?;
        rule.status = status;
        Ok(())
    }

    async fn insert_action(&self, action: &FollowUpAction) -> Result<(), DatabaseError> {
        self.tables.write().await.actions.push(action.clone());
        Ok(())
    }

    async fn list_actions(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<FollowUpAction>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut actions: Vec<_> = tables
            .actions
            .iter()
            .filter(|a| a.rule_id == rule_id && a.message_id == message_id)
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.attempt_number);
        Ok(actions)
    }

    async fn list_due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpAction>, DatabaseError> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Pending && a.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_action(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.write().await;
        let action = tables
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("follow_up_action", id))?;
        if action.status != ActionStatus::Pending {
            return Ok(false);
        }
        action.status = ActionStatus::InFlight;
        action.updated_at = now;
        Ok(true)
    }

    async fn finish_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        follow_up_message_id: Option<Uuid>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.write().await;
        let action = tables
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("follow_up_action", id))?;
        action.status = status;
        action.follow_up_message_id = follow_up_message_id.or(action.follow_up_message_id);
        action.last_error = error.map(String::from);
        action.updated_at = now;
        Ok(())
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let mut tables = self.tables.write().await;
        let mut released = 0;
        for action in tables
            .actions
            .iter_mut()
            .filter(|a| a.status == ActionStatus::InFlight && a.updated_at < claimed_before)
        {
            action.status = ActionStatus::Failed;
            action.last_error = Some(STALE_CLAIM_ERROR.to_string());
            action.updated_at = now;
            released += 1;
        }
        Ok(released)
    }

    async fn complete_rule_instance(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.tables
            .write()
            .await
            .completed_instances
            .insert((rule_id, message_id));
        Ok(())
    }

    async fn is_rule_instance_completed(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .tables
            .read()
            .await
            .completed_instances
            .contains(&(rule_id, message_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::followup::model::TriggerType;

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = MemoryStore::new();
        let rule = FollowUpRule::new(Uuid::new_v4(), TriggerType::Bounced, 0, 3);
        let action = FollowUpAction::pending(&rule, Uuid::new_v4(), Utc::now(), 1);
        store.insert_action(&action).await.unwrap();

        assert!(store.claim_action(action.id, Utc::now()).await.unwrap());
        assert!(!store.claim_action(action.id, Utc::now()).await.unwrap());
        assert!(store.list_due_actions(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_claims_are_failed_fresh_ones_kept() {
        let store = MemoryStore::new();
        let rule = FollowUpRule::new(Uuid::new_v4(), TriggerType::Bounced, 0, 3);
        let now = Utc::now();
        let old = FollowUpAction::pending(&rule, Uuid::new_v4(), now, 1);
        let fresh = FollowUpAction::pending(&rule, Uuid::new_v4(), now, 1);
        store.insert_action(&old).await.unwrap();
        store.insert_action(&fresh).await.unwrap();
        store.claim_action(old.id, now - chrono::Duration::hours(1)).await.unwrap();
        store.claim_action(fresh.id, now).await.unwrap();

        let released = store
            .release_stale_claims(now - chrono::Duration::minutes(10), now)
            .await
            .unwrap();
        assert_eq!(released, 1);

        let old = &store.list_actions(rule.id, old.message_id).await.unwrap()[0];
        assert_eq!(old.status, ActionStatus::Failed);
        assert_eq!(old.last_error.as_deref(), Some(STALE_CLAIM_ERROR));
        let fresh = &store.list_actions(rule.id, fresh.message_id).await.unwrap()[0];
        assert_eq!(fresh.status, ActionStatus::InFlight);
    }

    #[tokio::test]
    async fn unknown_campaign_message_save_fails() {
        let store = MemoryStore::new();
        let msg = MessageDraft::new(
            Uuid::new_v4(),
            crate::campaign::model::Channel::Email,
            None,
            "x",
            crate::campaign::model::Tone::Casual,
        );
        let err = store.save_message(Uuid::new_v4(), &msg).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
