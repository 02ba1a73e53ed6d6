//! `CampaignStore` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::campaign::model::{Campaign, CampaignStatus, CampaignSummary, MessageDraft};
use crate::error::DatabaseError;
use crate::followup::model::{ActionStatus, FollowUpAction, FollowUpRule, RuleStatus};

/// `last_error` recorded on actions closed by `release_stale_claims`.
pub const STALE_CLAIM_ERROR: &str = "claim expired before the run finished";

/// Backend-agnostic store covering campaigns, messages, and follow-ups.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    // ── Campaigns ───────────────────────────────────────────────────

    /// Insert a campaign with all of its targets and messages in one batch.
    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError>;

    /// Load a campaign with its targets and messages.
    async fn load_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError>;

    /// Newest first, optionally filtered by owner.
    async fn list_campaigns(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CampaignSummary>, DatabaseError>;

    async fn update_campaign_status(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert or replace one message (status, content, history).
    async fn save_message(
        &self,
        campaign_id: Uuid,
        message: &MessageDraft,
    ) -> Result<(), DatabaseError>;

    // ── Follow-up rules ─────────────────────────────────────────────

    async fn insert_rule(&self, rule: &FollowUpRule) -> Result<(), DatabaseError>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<FollowUpRule>, DatabaseError>;

    /// Rules for one campaign, or all rules when `campaign_id` is `None`.
    async fn list_rules(&self, campaign_id: Option<Uuid>) -> Result<Vec<FollowUpRule>, DatabaseError>;

    async fn update_rule_status(&self, id: Uuid, status: RuleStatus) -> Result<(), DatabaseError>;

    // ── Follow-up actions ───────────────────────────────────────────

    async fn insert_action(&self, action: &FollowUpAction) -> Result<(), DatabaseError>;

    /// All actions for one (rule, original message) pair, oldest attempt first.
    async fn list_actions(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
    ) -> Result<Vec<FollowUpAction>, DatabaseError>;

    /// Pending actions with `scheduled_at <= now`, oldest first.
    async fn list_due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpAction>, DatabaseError>;

    /// Atomically move an action from `pending` to `in_flight`.
    ///
    /// Returns `false` if another run already claimed it.
    async fn claim_action(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Record the final outcome of a claimed action.
    async fn finish_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        follow_up_message_id: Option<Uuid>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Fail every `in_flight` action claimed before `claimed_before`.
    ///
    /// A run that died between claim and finish leaves its action in flight;
    /// this closes it out so the (rule, message) pair can be queued again.
    /// Returns the number of actions released.
    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    // ── Rule instances ──────────────────────────────────────────────

    /// Mark a rule exhausted for one original message.
    async fn complete_rule_instance(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn is_rule_instance_completed(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
    ) -> Result<bool, DatabaseError>;
}
