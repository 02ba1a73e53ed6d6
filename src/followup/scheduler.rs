//! Follow-up scheduling and delivery.
//!
//! Two phases per tick:
//! 1. **schedule**: evaluate every original message against its campaign's
//!    rules and queue one `pending` action per fired (rule, message) pair,
//!    unless an open action already exists or the attempt cap is reached.
//! 2. **process**: claim each due action (`pending -> in_flight`, atomic in
//!    the store), render the follow-up, approve and send it, and record
//!    `sent` or `failed`.
//!
//! Overlapping ticks are safe: a claimed action is invisible to other runs,
//! so no follow-up is ever sent twice.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::{evaluate, precondition_holds};
use super::model::{ActionStatus, FollowUpAction, FollowUpRule, RuleStatus, TriggerType};
use crate::campaign::approval::CampaignBook;
use crate::campaign::model::{Campaign, MessageDraft, MessageStatus};
use crate::config::FollowUpConfig;
use crate::error::FollowUpError;
use crate::generator::MessageGenerator;
use crate::store::CampaignStore;

/// Counts from one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Due actions another run had already claimed.
    pub already_claimed: usize,
    /// Stale in-flight claims failed at the start of the pass.
    pub released: usize,
    /// Actions whose bookkeeping hit a store error; the pass moved on.
    pub store_errors: usize,
}

/// Counts from one full tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub scheduled: usize,
    #[serde(flatten)]
    pub processed: ProcessReport,
}

enum Outcome {
    Sent(Uuid),
    Failed(Option<Uuid>, String),
    Skipped(String),
}

pub struct FollowUpScheduler {
    book: Arc<CampaignBook>,
    generator: Arc<MessageGenerator>,
    config: FollowUpConfig,
    /// Serializes the schedule phase so two ticks never queue the same pair.
    schedule_lock: Mutex<()>,
}

impl FollowUpScheduler {
    pub fn new(
        book: Arc<CampaignBook>,
        generator: Arc<MessageGenerator>,
        config: FollowUpConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            book,
            generator,
            config,
            schedule_lock: Mutex::new(()),
        })
    }

    fn store(&self) -> &Arc<dyn CampaignStore> {
        self.book.store()
    }

    pub fn config(&self) -> &FollowUpConfig {
        &self.config
    }

    /// Attach a rule to a live campaign.
    pub async fn add_rule(&self, rule: FollowUpRule) -> Result<FollowUpRule, FollowUpError> {
        let campaign = self
            .book
            .get(rule.campaign_id)
            .await
            .ok_or_else(|| FollowUpError::InvalidRule(format!("campaign {} not found", rule.campaign_id)))?;
        if campaign.status.is_closed() {
            return Err(FollowUpError::InvalidRule(format!(
                "campaign {} is {}",
                campaign.id, campaign.status
            )));
        }
        self.store().insert_rule(&rule).await?;
        info!(
            rule_id = %rule.id,
            campaign_id = %rule.campaign_id,
            trigger = %rule.trigger,
            delay_hours = rule.delay_hours,
            max_attempts = rule.max_attempts,
            "Follow-up rule added"
        );
        Ok(rule)
    }

    /// Default rule for a new campaign, built from its settings.
    pub async fn add_default_rule(&self, campaign: &Campaign) -> Result<Option<FollowUpRule>, FollowUpError> {
        if !campaign.settings.follow_up_enabled {
            return Ok(None);
        }
        let rule = FollowUpRule::new(
            campaign.id,
            TriggerType::UnopenedAfterHours,
            campaign.settings.follow_up_delay_hours,
            campaign.settings.max_follow_up_attempts,
        )
        .with_tone(campaign.intent.tone);
        self.add_rule(rule).await.map(Some)
    }

    /// Queue actions for one campaign.
    pub async fn schedule(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<FollowUpAction>, FollowUpError> {
        let _guard = self.schedule_lock.lock().await;
        self.schedule_locked(campaign_id, now).await
    }

    async fn schedule_locked(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<FollowUpAction>, FollowUpError> {
        let Some(campaign) = self.book.get(campaign_id).await else {
            warn!(campaign_id = %campaign_id, "Rules reference a missing campaign");
            return Ok(Vec::new());
        };
        if campaign.status.is_closed() {
            return Ok(Vec::new());
        }
        let rules = self.store().list_rules(Some(campaign_id)).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let mut queued = Vec::new();
        for message in campaign.messages().iter().filter(|m| m.follow_up.is_none()) {
            if target_replied(&campaign, message) {
                continue;
            }
            for trigger in evaluate(message, &rules, now) {
                let Some(rule) = rules.iter().find(|r| r.id == trigger.rule_id) else {
                    continue;
                };
                if let Some(action) = self.queue(rule, message, trigger.due_at, now).await? {
                    queued.push(action);
                }
            }
        }

        if !queued.is_empty() {
            info!(campaign_id = %campaign_id, queued = queued.len(), "Follow-ups scheduled");
        }
        Ok(queued)
    }

    /// Insert the next attempt for (rule, message) if one is allowed.
    async fn queue(
        &self,
        rule: &FollowUpRule,
        message: &MessageDraft,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<FollowUpAction>, FollowUpError> {
        let store = self.store();
        if store.is_rule_instance_completed(rule.id, message.id).await? {
            return Ok(None);
        }

        let history = store.list_actions(rule.id, message.id).await?;
        if history.iter().any(|a| a.status.is_open()) {
            debug!(rule_id = %rule.id, message_id = %message.id, "Open action exists");
            return Ok(None);
        }
        let attempts: Vec<_> = history
            .iter()
            .filter(|a| a.status != ActionStatus::Skipped)
            .collect();
        let attempt_number = attempts.len() as u32 + 1;
        if attempt_number > rule.max_attempts {
            store.complete_rule_instance(rule.id, message.id, now).await?;
            info!(rule_id = %rule.id, message_id = %message.id, "Follow-up attempts exhausted");
            self.complete_rule_if_exhausted(rule).await?;
            return Ok(None);
        }

        // Later attempts wait one full delay after the previous one finished.
        let scheduled_at = match attempts.last() {
            Some(prev) if rule.trigger != TriggerType::Bounced => {
                due_at.max(prev.updated_at + rule.delay())
            }
            _ => due_at,
        };

        let action = FollowUpAction::pending(rule, message.id, scheduled_at, attempt_number);
        store.insert_action(&action).await?;
        debug!(
            action_id = %action.id,
            attempt = attempt_number,
            scheduled_at = %scheduled_at,
            "Follow-up queued"
        );
        Ok(Some(action))
    }

    /// Queue actions across every campaign that has rules.
    pub async fn schedule_all(&self, now: DateTime<Utc>) -> Result<usize, FollowUpError> {
        let _guard = self.schedule_lock.lock().await;
        let campaign_ids: BTreeSet<Uuid> = self
            .store()
            .list_rules(None)
            .await?
            .into_iter()
            .filter(|r| r.is_active())
            .map(|r| r.campaign_id)
            .collect();

        let mut total = 0;
        for campaign_id in campaign_ids {
            match self.schedule_locked(campaign_id, now).await {
                Ok(actions) => total += actions.len(),
                Err(e) => {
                    error!(campaign_id = %campaign_id, error = %e, "Follow-up scheduling failed");
                }
            }
        }
        Ok(total)
    }

    /// Queue a manual follow-up for one message, due now.
    pub async fn fire_manual(
        &self,
        rule_id: Uuid,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<FollowUpAction>, FollowUpError> {
        let rule = self
            .store()
            .get_rule(rule_id)
            .await?
            .ok_or(FollowUpError::RuleNotFound(rule_id))?;
        if rule.trigger != TriggerType::Manual {
            return Err(FollowUpError::InvalidRule(format!(
                "rule {rule_id} fires on {}, not manually",
                rule.trigger
            )));
        }
        let message = self.book.message(message_id).await.ok_or_else(|| {
            FollowUpError::Scheduling {
                message_id,
                reason: "message not found".into(),
            }
        })?;
        if !message.status.is_outbound() {
            return Err(FollowUpError::Scheduling {
                message_id,
                reason: format!("message is {}, not sent", message.status),
            });
        }
        let _guard = self.schedule_lock.lock().await;
        self.queue(&rule, &message, now, now).await
    }

    /// Claim and run every due action. Safe to call concurrently with itself.
    ///
    /// Store errors on one action are logged and counted; the rest of the
    /// batch still runs.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<ProcessReport, FollowUpError> {
        let mut report = ProcessReport::default();

        let stuck = chrono::Duration::from_std(self.config.stuck_threshold)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let claimed_before = now.checked_sub_signed(stuck).unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.store().release_stale_claims(claimed_before, now).await {
            Ok(0) => {}
            Ok(n) => {
                warn!(released = n, "Failed stale follow-up claims");
                report.released = n;
            }
            Err(e) => {
                error!(error = %e, "Releasing stale follow-up claims failed");
                report.store_errors += 1;
            }
        }

        let due = self
            .store()
            .list_due_actions(now, self.config.batch_size)
            .await?;

        for action in due {
            match self.store().claim_action(action.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    report.already_claimed += 1;
                    continue;
                }
                Err(e) => {
                    error!(action_id = %action.id, error = %e, "Claiming follow-up failed");
                    report.store_errors += 1;
                    continue;
                }
            }
            if let Err(e) = self.process_claimed(&action, &mut report).await {
                error!(action_id = %action.id, error = %e, "Follow-up bookkeeping failed");
                report.store_errors += 1;
            }
        }

        if report != ProcessReport::default() {
            info!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                already_claimed = report.already_claimed,
                released = report.released,
                store_errors = report.store_errors,
                "Processed due follow-ups"
            );
        }
        Ok(report)
    }

    /// Run one claimed action and record its outcome.
    async fn process_claimed(
        &self,
        action: &FollowUpAction,
        report: &mut ProcessReport,
    ) -> Result<(), FollowUpError> {
        let (status, follow_up_id, reason) = match self.run_action(action).await {
            Outcome::Sent(id) => {
                report.sent += 1;
                (ActionStatus::Sent, Some(id), None)
            }
            Outcome::Failed(id, reason) => {
                report.failed += 1;
                warn!(action_id = %action.id, error = %reason, "Follow-up failed");
                (ActionStatus::Failed, id, Some(reason))
            }
            Outcome::Skipped(reason) => {
                report.skipped += 1;
                debug!(action_id = %action.id, reason = %reason, "Follow-up skipped");
                (ActionStatus::Skipped, None, Some(reason))
            }
        };
        let finished_at = Utc::now();
        self.store()
            .finish_action(action.id, status, follow_up_id, reason.as_deref(), finished_at)
            .await?;

        if status != ActionStatus::Skipped
            && let Some(rule) = self.store().get_rule(action.rule_id).await?
            && action.attempt_number >= rule.max_attempts
        {
            self.store()
                .complete_rule_instance(rule.id, action.message_id, finished_at)
                .await?;
            info!(rule_id = %rule.id, message_id = %action.message_id, "Follow-up rule instance completed");
            self.complete_rule_if_exhausted(&rule).await?;
        }
        Ok(())
    }

    /// Mark the rule `completed` once every original message that can still
    /// be followed up has an exhausted instance. Rejected messages and
    /// targets that replied never fire, so they do not hold the rule open.
    async fn complete_rule_if_exhausted(&self, rule: &FollowUpRule) -> Result<bool, FollowUpError> {
        if !rule.is_active() {
            return Ok(false);
        }
        let Some(campaign) = self.book.get(rule.campaign_id).await else {
            return Ok(false);
        };
        let open_messages = campaign.messages().iter().filter(|m| {
            m.follow_up.is_none()
                && m.status != MessageStatus::Rejected
                && !target_replied(&campaign, m)
        });
        for message in open_messages {
            if !self
                .store()
                .is_rule_instance_completed(rule.id, message.id)
                .await?
            {
                return Ok(false);
            }
        }
        self.store()
            .update_rule_status(rule.id, RuleStatus::Completed)
            .await?;
        info!(rule_id = %rule.id, campaign_id = %rule.campaign_id, "Follow-up rule completed");
        Ok(true)
    }

    /// Stop a rule from firing. Queued actions are skipped when they come due.
    pub async fn pause_rule(&self, rule_id: Uuid) -> Result<FollowUpRule, FollowUpError> {
        self.set_rule_status(rule_id, RuleStatus::Active, RuleStatus::Paused)
            .await
    }

    /// Let a paused rule fire again.
    pub async fn resume_rule(&self, rule_id: Uuid) -> Result<FollowUpRule, FollowUpError> {
        self.set_rule_status(rule_id, RuleStatus::Paused, RuleStatus::Active)
            .await
    }

    async fn set_rule_status(
        &self,
        rule_id: Uuid,
        from: RuleStatus,
        to: RuleStatus,
    ) -> Result<FollowUpRule, FollowUpError> {
        let mut rule = self
            .store()
            .get_rule(rule_id)
            .await?
            .ok_or(FollowUpError::RuleNotFound(rule_id))?;
        if rule.status == to {
            return Ok(rule);
        }
        if rule.status != from {
            return Err(FollowUpError::InvalidRule(format!(
                "rule {rule_id} is {}, cannot become {to}",
                rule.status
            )));
        }
        self.store().update_rule_status(rule_id, to).await?;
        rule.status = to;
        info!(rule_id = %rule_id, status = %to, "Follow-up rule status changed");
        Ok(rule)
    }

    async fn run_action(&self, action: &FollowUpAction) -> Outcome {
        let rule = match self.store().get_rule(action.rule_id).await {
            Ok(Some(rule)) => rule,
            Ok(None) => return Outcome::Skipped("rule no longer exists".into()),
            Err(e) => return Outcome::Failed(None, e.to_string()),
        };
        if !rule.is_active() {
            return Outcome::Skipped(format!("rule is {}", rule.status));
        }
        let Some(campaign) = self.book.get(action.campaign_id).await else {
            return Outcome::Skipped("campaign not found".into());
        };
        if campaign.status.is_closed() {
            return Outcome::Skipped(format!("campaign is {}", campaign.status));
        }
        let Some(original) = campaign.message(action.message_id) else {
            return Outcome::Skipped("original message not found".into());
        };
        // The message may have moved on since the action was queued.
        if rule.trigger != TriggerType::Manual && !precondition_holds(rule.trigger, original.status) {
            return Outcome::Skipped(format!("message is now {}", original.status));
        }
        if target_replied(&campaign, original) {
            return Outcome::Skipped("target already replied".into());
        }
        let Some(target) = campaign.target(original.target_id) else {
            return Outcome::Skipped("target not found".into());
        };

        let draft = self.generator.generate_follow_up(
            original,
            &campaign.intent,
            target,
            &rule,
            action.attempt_number,
        );
        let draft = match self.book.add_follow_up(campaign.id, draft).await {
            Ok(draft) => draft,
            Err(e) => return Outcome::Failed(None, e.to_string()),
        };
        if let Err(e) = self.book.approve(draft.id).await {
            return Outcome::Failed(Some(draft.id), e.to_string());
        }
        match self.book.send(draft.id).await {
            Ok(sent) => {
                info!(
                    action_id = %action.id,
                    follow_up_id = %sent.id,
                    attempt = action.attempt_number,
                    "Follow-up sent"
                );
                Outcome::Sent(sent.id)
            }
            Err(e) => Outcome::Failed(Some(draft.id), e.to_string()),
        }
    }

    /// Schedule, then process. One ticker iteration.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, FollowUpError> {
        let scheduled = self.schedule_all(now).await?;
        let processed = self.process_due(now).await?;
        Ok(TickReport {
            scheduled,
            processed,
        })
    }
}

/// Whether any message to this target already got a reply.
fn target_replied(campaign: &Campaign, message: &MessageDraft) -> bool {
    campaign
        .messages()
        .iter()
        .any(|m| m.target_id == message.target_id && m.status == MessageStatus::Replied)
}

/// Spawn the recurring follow-up ticker on a cron schedule.
pub fn spawn_ticker(
    scheduler: Arc<FollowUpScheduler>,
) -> Result<tokio::task::JoinHandle<()>, FollowUpError> {
    let schedule = cron::Schedule::from_str(&scheduler.config.schedule)
        .map_err(|e| FollowUpError::InvalidRule(format!("invalid cron schedule: {e}")))?;
    info!(schedule = %scheduler.config.schedule, "Follow-up ticker started");

    Ok(tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Follow-up schedule has no upcoming fire time, ticker stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match scheduler.tick(Utc::now()).await {
                Ok(report) => debug!(?report, "Follow-up tick complete"),
                Err(e) => error!(error = %e, "Follow-up tick failed"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::Duration;

    use crate::campaign::model::{
        CampaignSettings, CampaignStatus, CampaignSummary, Channel, Intent, Purpose, Target, TargetType, Tone,
    };
    use crate::channels::{DeliveryReceipt, DryRunSender, MessageSender, OutboundMessage};
    use crate::error::{ChannelError, DatabaseError};
    use crate::store::MemoryStore;

    /// Delivers the first message, fails everything after.
    #[derive(Default)]
    struct FlakySender {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, msg: &OutboundMessage) -> Result<DeliveryReceipt, ChannelError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(DeliveryReceipt::new(format!("ok-{}", msg.message_id)));
            }
            Err(ChannelError::SendFailed {
                name: "flaky".into(),
                reason: "relay down".into(),
            })
        }
    }

    fn campaign() -> Campaign {
        let intent = Intent::new(TargetType::Hotel, Purpose::Partnership).with_channel(Channel::Email);
        let target = Target::new("Ann Lee")
            .with_company("Hotel One")
            .with_contact("ann@one.com");
        let msg = MessageDraft::new(target.id, Channel::Email, Some("Hello".into()), "Hi Ann", Tone::Professional);
        Campaign::assemble(intent, "explicit", vec![target], vec![msg], CampaignSettings::default(), None)
    }

    async fn setup(sender: Arc<dyn MessageSender>) -> (Arc<CampaignBook>, Arc<FollowUpScheduler>, Uuid, Uuid) {
        let c = campaign();
        let (campaign_id, message_id) = (c.id, c.messages()[0].id);
        let (book, scheduler) = build(c, Arc::new(MemoryStore::new()), sender).await;
        (book, scheduler, campaign_id, message_id)
    }

    async fn build(
        campaign: Campaign,
        store: Arc<dyn CampaignStore>,
        sender: Arc<dyn MessageSender>,
    ) -> (Arc<CampaignBook>, Arc<FollowUpScheduler>) {
        let book = CampaignBook::with_send_timeout(store, sender, StdDuration::from_millis(200));
        book.insert(campaign).await;
        let scheduler = FollowUpScheduler::new(
            book.clone(),
            Arc::new(MessageGenerator::default()),
            FollowUpConfig::default(),
        );
        (book, scheduler)
    }

    /// Memory store whose first `finish_action` call fails.
    #[derive(Default)]
    struct FinishFailsOnce {
        inner: MemoryStore,
        tripped: AtomicBool,
    }

    #[async_trait]
    impl CampaignStore for FinishFailsOnce {
        async fn save_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError> {
            self.inner.save_campaign(campaign).await
        }
        async fn load_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
            self.inner.load_campaign(id).await
        }
        async fn list_campaigns(
            &self,
            user_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<CampaignSummary>, DatabaseError> {
            self.inner.list_campaigns(user_id, limit).await
        }
        async fn update_campaign_status(&self, id: Uuid, status: CampaignStatus) -> Result<(), DatabaseError> {
            self.inner.update_campaign_status(id, status).await
        }
        async fn save_message(&self, campaign_id: Uuid, message: &MessageDraft) -> Result<(), DatabaseError> {
            self.inner.save_message(campaign_id, message).await
        }
        async fn insert_rule(&self, rule: &FollowUpRule) -> Result<(), DatabaseError> {
            self.inner.insert_rule(rule).await
        }
        async fn get_rule(&self, id: Uuid) -> Result<Option<FollowUpRule>, DatabaseError> {
            self.inner.get_rule(id).await
        }
        async fn list_rules(&self, campaign_id: Option<Uuid>) -> Result<Vec<FollowUpRule>, DatabaseError> {
            self.inner.list_rules(campaign_id).await
        }
        async fn update_rule_status(&self, id: Uuid, status: RuleStatus) -> Result<(), DatabaseError> {
            self.inner.update_rule_status(id, status).await
        }
        async fn insert_action(&self, action: &FollowUpAction) -> Result<(), DatabaseError> {
            self.inner.insert_action(action).await
        }
        async fn list_actions(&self, rule_id: Uuid, message_id: Uuid) -> Result<Vec<FollowUpAction>, DatabaseError> {
            self.inner.list_actions(rule_id, message_id).await
        }
        async fn list_due_actions(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<FollowUpAction>, DatabaseError> {
            self.inner.list_due_actions(now, limit).await
        }
        async fn claim_action(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
            self.inner.claim_action(id, now).await
        }
        async fn finish_action(
            &self,
            id: Uuid,
            status: ActionStatus,
            follow_up_message_id: Option<Uuid>,
            error: Option<&str>,
            now: DateTime<Utc>,
        ) -> Result<(), DatabaseError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(DatabaseError::Query("disk I/O error".into()));
            }
            self.inner
                .finish_action(id, status, follow_up_message_id, error, now)
                .await
        }
        async fn release_stale_claims(
            &self,
            claimed_before: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<usize, DatabaseError> {
            self.inner.release_stale_claims(claimed_before, now).await
        }
        async fn complete_rule_instance(
            &self,
            rule_id: Uuid,
            message_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<(), DatabaseError> {
            self.inner.complete_rule_instance(rule_id, message_id, now).await
        }
        async fn is_rule_instance_completed(&self, rule_id: Uuid, message_id: Uuid) -> Result<bool, DatabaseError> {
            self.inner.is_rule_instance_completed(rule_id, message_id).await
        }
    }

    fn two_target_campaign() -> Campaign {
        let intent = Intent::new(TargetType::Hotel, Purpose::Partnership).with_channel(Channel::Email);
        let ann = Target::new("Ann Lee").with_company("Hotel One").with_contact("ann@one.com");
        let bo = Target::new("Bo Park").with_company("Hotel Two").with_contact("bo@two.com");
        let messages = vec![
            MessageDraft::new(ann.id, Channel::Email, Some("Hello".into()), "Hi Ann", Tone::Professional),
            MessageDraft::new(bo.id, Channel::Email, Some("Hello".into()), "Hi Bo", Tone::Professional),
        ];
        Campaign::assemble(intent, "explicit", vec![ann, bo], messages, CampaignSettings::default(), None)
    }

    async fn send_original(book: &CampaignBook, message_id: Uuid) -> DateTime<Utc> {
        book.approve(message_id).await.unwrap();
        book.send(message_id).await.unwrap().sent_at().unwrap()
    }

    #[tokio::test]
    async fn unopened_message_gets_one_action_due_now() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(DryRunSender::new())).await;
        let sent_at = send_original(&book, message_id).await;
        let rule = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 72, 3))
            .await
            .unwrap();

        let now = sent_at + Duration::hours(73);
        let actions = scheduler.schedule(campaign_id, now).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].scheduled_at, now);
        assert_eq!(actions[0].status, ActionStatus::Pending);
        assert_eq!(actions[0].attempt_number, 1);

        // Re-evaluating while the action is open queues nothing new.
        assert!(scheduler.schedule(campaign_id, now).await.unwrap().is_empty());
        let all = book.store().list_actions(rule.id, message_id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn opened_before_processing_skips_unopened_action() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(DryRunSender::new())).await;
        let sent_at = send_original(&book, message_id).await;
        scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 72, 3))
            .await
            .unwrap();
        let now = sent_at + Duration::hours(73);
        scheduler.schedule(campaign_id, now).await.unwrap();

        book.record_event(message_id, MessageStatus::Opened, Some(now))
            .await
            .unwrap();
        let report = scheduler.process_due(now).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 0);
        assert!(scheduler.schedule(campaign_id, now + Duration::hours(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processing_twice_sends_once() {
        let sender = Arc::new(DryRunSender::new());
        let (book, scheduler, campaign_id, message_id) = setup(sender.clone()).await;
        let sent_at = send_original(&book, message_id).await;
        scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 72, 3))
            .await
            .unwrap();
        let now = sent_at + Duration::hours(73);
        scheduler.schedule(campaign_id, now).await.unwrap();

        let (a, b) = tokio::join!(scheduler.process_due(now), scheduler.process_due(now));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.sent + b.sent, 1);
        assert_eq!(scheduler.process_due(now).await.unwrap(), ProcessReport::default());

        // Original plus exactly one follow-up.
        assert_eq!(sender.sent().await.len(), 2);
        let campaign = book.get(campaign_id).await.unwrap();
        let follow_up = campaign.messages().iter().find(|m| m.follow_up.is_some()).unwrap();
        assert_eq!(follow_up.status, MessageStatus::Sent);
        assert_eq!(follow_up.subject.as_deref(), Some("Re: Hello"));
    }

    #[tokio::test]
    async fn attempts_never_exceed_cap() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(DryRunSender::new())).await;
        let sent_at = send_original(&book, message_id).await;
        let rule = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 0, 2))
            .await
            .unwrap();

        let mut now = sent_at + Duration::hours(1);
        for _ in 0..5 {
            scheduler.tick(now).await.unwrap();
            now += Duration::hours(1);
        }

        let actions = book.store().list_actions(rule.id, message_id).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.attempt_number <= rule.max_attempts));
        assert!(book
            .store()
            .is_rule_instance_completed(rule.id, message_id)
            .await
            .unwrap());
        let stored = book.store().get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RuleStatus::Completed);
    }

    #[tokio::test]
    async fn store_failure_on_one_action_does_not_stop_the_batch() {
        let c = two_target_campaign();
        let campaign_id = c.id;
        let ids: Vec<Uuid> = c.messages().iter().map(|m| m.id).collect();
        let store = Arc::new(FinishFailsOnce::default());
        let (book, scheduler) = build(c, store.clone(), Arc::new(DryRunSender::new())).await;
        send_original(&book, ids[0]).await;
        let sent_at = send_original(&book, ids[1]).await;
        let rule = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 0, 3))
            .await
            .unwrap();

        let now = sent_at + Duration::hours(1);
        let report = scheduler.tick(now).await.unwrap();
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.processed.sent, 2);
        assert_eq!(report.processed.store_errors, 1);

        // The action whose outcome could not be recorded is stuck in flight.
        let mut stuck_message = None;
        for id in &ids {
            let actions = store.list_actions(rule.id, *id).await.unwrap();
            if actions[0].status == ActionStatus::InFlight {
                stuck_message = Some(*id);
            }
        }
        let stuck_message = stuck_message.expect("one action left in flight");
        let queued = scheduler.schedule(campaign_id, now).await.unwrap();
        assert!(queued.iter().all(|a| a.message_id != stuck_message));

        // Past the stuck threshold the claim is failed and the pair can be queued again.
        let later = now + Duration::minutes(30);
        let report = scheduler.process_due(later).await.unwrap();
        assert_eq!(report.released, 1);
        let actions = store.list_actions(rule.id, stuck_message).await.unwrap();
        assert_eq!(actions[0].status, ActionStatus::Failed);

        let queued = scheduler.schedule(campaign_id, later + Duration::hours(1)).await.unwrap();
        assert!(queued.iter().any(|a| a.message_id == stuck_message && a.attempt_number == 2));
    }

    #[tokio::test]
    async fn paused_rule_neither_queues_nor_sends() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(DryRunSender::new())).await;
        let sent_at = send_original(&book, message_id).await;
        let rule = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 0, 3))
            .await
            .unwrap();
        let now = sent_at + Duration::hours(1);

        // Queued before the pause, skipped when it comes due.
        scheduler.schedule(campaign_id, now).await.unwrap();
        let paused = scheduler.pause_rule(rule.id).await.unwrap();
        assert_eq!(paused.status, RuleStatus::Paused);
        assert_eq!(scheduler.pause_rule(rule.id).await.unwrap().status, RuleStatus::Paused);

        let report = scheduler.tick(now).await.unwrap();
        assert_eq!(report.scheduled, 0);
        assert_eq!(report.processed.skipped, 1);
        assert_eq!(report.processed.sent, 0);

        scheduler.resume_rule(rule.id).await.unwrap();
        let report = scheduler.tick(now + Duration::hours(1)).await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.processed.sent, 1);
    }

    #[tokio::test]
    async fn completed_rule_cannot_be_resumed() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(DryRunSender::new())).await;
        let sent_at = send_original(&book, message_id).await;
        let rule = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 0, 1))
            .await
            .unwrap();
        scheduler.tick(sent_at + Duration::hours(1)).await.unwrap();
        assert_eq!(
            book.store().get_rule(rule.id).await.unwrap().unwrap().status,
            RuleStatus::Completed
        );

        assert!(matches!(
            scheduler.resume_rule(rule.id).await,
            Err(FollowUpError::InvalidRule(_))
        ));
        assert!(matches!(
            scheduler.pause_rule(Uuid::new_v4()).await,
            Err(FollowUpError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delivery_failure_is_recorded_and_retried_until_cap() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(FlakySender::default())).await;
        let sent_at = send_original(&book, message_id).await;
        let rule = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::UnopenedAfterHours, 0, 2))
            .await
            .unwrap();

        let now = sent_at + Duration::hours(1);
        let first = scheduler.tick(now).await.unwrap();
        assert_eq!(first.scheduled, 1);
        assert_eq!(first.processed.failed, 1);

        let actions = book.store().list_actions(rule.id, message_id).await.unwrap();
        assert_eq!(actions[0].status, ActionStatus::Failed);
        assert!(actions[0].last_error.as_deref().unwrap().contains("relay down"));
        assert!(actions[0].follow_up_message_id.is_some());

        let second = scheduler.tick(now + Duration::hours(1)).await.unwrap();
        assert_eq!(second.processed.failed, 1);
        let third = scheduler.tick(now + Duration::hours(2)).await.unwrap();
        assert_eq!(third, TickReport::default());
        assert!(book
            .store()
            .is_rule_instance_completed(rule.id, message_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn closed_campaign_rejects_rules() {
        let (book, scheduler, campaign_id, _) = setup(Arc::new(DryRunSender::new())).await;
        book.cancel(campaign_id).await.unwrap();
        let err = scheduler
            .add_rule(FollowUpRule::new(campaign_id, TriggerType::Bounced, 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, FollowUpError::InvalidRule(_)));
    }

    #[tokio::test]
    async fn manual_rule_fires_on_request_only() {
        let (book, scheduler, campaign_id, message_id) = setup(Arc::new(DryRunSender::new())).await;
        let sent_at = send_original(&book, message_id).await;
        let rule = scheduler
            .add_rule(
                FollowUpRule::new(campaign_id, TriggerType::Manual, 0, 1)
                    .with_template("{{greeting}} quick nudge on this."),
            )
            .await
            .unwrap();

        let later = sent_at + Duration::hours(500);
        assert_eq!(scheduler.schedule(campaign_id, later).await.unwrap().len(), 0);

        let action = scheduler.fire_manual(rule.id, message_id, later).await.unwrap();
        assert!(action.is_some());
        let report = scheduler.process_due(later).await.unwrap();
        assert_eq!(report.sent, 1);

        let campaign = book.get(campaign_id).await.unwrap();
        let follow_up = campaign.messages().iter().find(|m| m.follow_up.is_some()).unwrap();
        assert_eq!(follow_up.body, "Hi Ann, quick nudge on this.");
    }

    #[tokio::test]
    async fn default_rule_follows_settings() {
        let (book, scheduler, campaign_id, _) = setup(Arc::new(DryRunSender::new())).await;
        let campaign = book.get(campaign_id).await.unwrap();
        let rule = scheduler.add_default_rule(&campaign).await.unwrap().unwrap();
        assert_eq!(rule.trigger, TriggerType::UnopenedAfterHours);
        assert_eq!(rule.delay_hours, 72);
        assert_eq!(rule.max_attempts, 3);
    }
}
