//! Approval state machine and the in-memory campaign book.
//!
//! Every message moves through a fixed transition table:
//!
//! ```text
//! draft ─► approved ─► sending ─► sent ─► delivered ─► opened ─► clicked ─► replied
//!   │         │           │         │          │          │
//!   ▼         ▼           ▼         └──────────┴──────────┴──► replied / bounced
//! rejected  draft       failed
//! ```
//!
//! Nothing is delivered without an explicit approval first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::CampaignEvent;
use super::model::{Campaign, CampaignStatus, CampaignSummary, MessageDraft, MessageStatus};
use crate::channels::{MessageSender, OutboundMessage};
use crate::error::{ApprovalError, ChannelError};
use crate::store::CampaignStore;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Default ceiling on one delivery attempt.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether `from -> to` is a legal message transition.
pub fn can_transition(from: MessageStatus, to: MessageStatus) -> bool {
    use MessageStatus::*;
    matches!(
        (from, to),
        (Draft, Approved)
            | (Draft, Rejected)
            | (Approved, Sending)
            | (Approved, Draft)
            | (Sending, Sent)
            | (Sending, Failed)
            | (Sent, Delivered | Opened | Clicked | Replied | Bounced)
            | (Delivered, Opened | Clicked | Replied | Bounced)
            | (Opened, Clicked | Replied)
            | (Clicked, Replied)
    )
}

/// Statuses that only a transport or tracking event may set.
pub fn is_engagement(status: MessageStatus) -> bool {
    matches!(
        status,
        MessageStatus::Delivered
            | MessageStatus::Opened
            | MessageStatus::Clicked
            | MessageStatus::Replied
            | MessageStatus::Bounced
    )
}

/// Per-message result of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub message_id: Uuid,
    pub error: String,
}

impl BulkOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Live campaigns, keyed by id, with fan-out of every change.
///
/// Status changes are persisted best-effort: a store failure is logged and
/// the in-memory state stays authoritative.
pub struct CampaignBook {
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    message_index: RwLock<HashMap<Uuid, Uuid>>,
    store: Arc<dyn CampaignStore>,
    sender: Arc<dyn MessageSender>,
    send_timeout: Duration,
    tx: broadcast::Sender<CampaignEvent>,
}

impl CampaignBook {
    pub fn new(store: Arc<dyn CampaignStore>, sender: Arc<dyn MessageSender>) -> Arc<Self> {
        Self::with_send_timeout(store, sender, DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(
        store: Arc<dyn CampaignStore>,
        sender: Arc<dyn MessageSender>,
        send_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            campaigns: RwLock::new(HashMap::new()),
            message_index: RwLock::new(HashMap::new()),
            store,
            sender,
            send_timeout,
            tx,
        })
    }

    /// Subscribe to campaign events. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event. Fine if nobody is listening.
    pub fn publish(&self, event: CampaignEvent) {
        debug!(event = event.label(), "Publishing campaign event");
        let _ = self.tx.send(event);
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    /// Register a freshly assembled (or reloaded) campaign.
    pub async fn insert(&self, campaign: Campaign) {
        let summary = CampaignSummary::from(&campaign);
        {
            let mut index = self.message_index.write().await;
            for msg in campaign.messages() {
                index.insert(msg.id, campaign.id);
            }
        }
        info!(
            campaign_id = %campaign.id,
            messages = campaign.messages().len(),
            "Campaign registered"
        );
        self.campaigns.write().await.insert(campaign.id, campaign);
        self.publish(CampaignEvent::CampaignCreated { campaign: summary });
    }

    /// Fetch a campaign, falling back to the store for ones not loaded yet.
    pub async fn get(&self, campaign_id: Uuid) -> Option<Campaign> {
        if let Some(c) = self.campaigns.read().await.get(&campaign_id) {
            return Some(c.clone());
        }
        match self.store.load_campaign(campaign_id).await {
            Ok(Some(campaign)) => {
                {
                    let mut index = self.message_index.write().await;
                    for msg in campaign.messages() {
                        index.insert(msg.id, campaign.id);
                    }
                }
                self.campaigns
                    .write()
                    .await
                    .insert(campaign.id, campaign.clone());
                Some(campaign)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Failed to load campaign from store");
                None
            }
        }
    }

    /// Summaries of loaded campaigns, newest first, optionally for one user.
    pub async fn list(&self, user_id: Option<&str>) -> Vec<CampaignSummary> {
        let campaigns = self.campaigns.read().await;
        let mut out: Vec<_> = campaigns
            .values()
            .filter(|c| user_id.is_none() || c.user_id.as_deref() == user_id)
            .map(CampaignSummary::from)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Which campaign owns a message.
    pub async fn campaign_for_message(&self, message_id: Uuid) -> Option<Uuid> {
        self.message_index.read().await.get(&message_id).copied()
    }

    pub async fn message(&self, message_id: Uuid) -> Option<MessageDraft> {
        let campaign_id = self.campaign_for_message(message_id).await?;
        let campaigns = self.campaigns.read().await;
        campaigns.get(&campaign_id)?.message(message_id).cloned()
    }

    /// `draft -> approved`.
    pub async fn approve(&self, message_id: Uuid) -> Result<MessageDraft, ApprovalError> {
        self.transition(message_id, MessageStatus::Approved).await
    }

    /// `draft -> rejected`. Terminal.
    pub async fn reject(&self, message_id: Uuid) -> Result<MessageDraft, ApprovalError> {
        self.transition(message_id, MessageStatus::Rejected).await
    }

    /// `approved -> draft`, to allow editing again.
    pub async fn reset_to_draft(&self, message_id: Uuid) -> Result<MessageDraft, ApprovalError> {
        self.transition(message_id, MessageStatus::Draft).await
    }

    /// Replace body and optionally subject. Only drafts are editable.
    pub async fn edit(
        &self,
        message_id: Uuid,
        body: String,
        subject: Option<String>,
    ) -> Result<MessageDraft, ApprovalError> {
        let campaign_id = self
            .campaign_for_message(message_id)
            .await
            .ok_or(ApprovalError::MessageNotFound(message_id))?;

        let (updated, stats) = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            if campaign.status.is_closed() {
                return Err(ApprovalError::CampaignClosed(campaign_id));
            }
            let updated = campaign
                .update_message(message_id, |m| {
                    if m.status != MessageStatus::Draft {
                        return Err(ApprovalError::NotEditable {
                            id: m.id,
                            status: m.status,
                        });
                    }
                    m.body = body;
                    if m.channel.supports_subject() && subject.is_some() {
                        m.subject = subject;
                    }
                    m.updated_at = Utc::now();
                    Ok(m.clone())
                })
                .ok_or(ApprovalError::MessageNotFound(message_id))??;
            (updated, campaign.stats().clone())
        };

        info!(message_id = %message_id, "Message edited");
        self.persist_message(campaign_id, &updated).await;
        self.publish(CampaignEvent::MessageUpdated {
            campaign_id,
            message: updated.clone(),
            stats,
        });
        Ok(updated)
    }

    /// Swap in freshly generated copy for a draft, keeping its id and history.
    pub async fn replace_content(
        &self,
        message_id: Uuid,
        replacement: MessageDraft,
    ) -> Result<MessageDraft, ApprovalError> {
        let campaign_id = self
            .campaign_for_message(message_id)
            .await
            .ok_or(ApprovalError::MessageNotFound(message_id))?;

        let (updated, stats) = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            if campaign.status.is_closed() {
                return Err(ApprovalError::CampaignClosed(campaign_id));
            }
            let updated = campaign
                .update_message(message_id, |m| {
                    if m.status != MessageStatus::Draft {
                        return Err(ApprovalError::NotEditable {
                            id: m.id,
                            status: m.status,
                        });
                    }
                    m.subject = replacement.subject;
                    m.body = replacement.body;
                    m.tone = replacement.tone;
                    m.personalization = replacement.personalization;
                    m.quality_score = replacement.quality_score;
                    m.template_id = replacement.template_id;
                    m.updated_at = Utc::now();
                    Ok(m.clone())
                })
                .ok_or(ApprovalError::MessageNotFound(message_id))??;
            (updated, campaign.stats().clone())
        };

        info!(message_id = %message_id, tone = %updated.tone, "Message regenerated");
        self.persist_message(campaign_id, &updated).await;
        self.publish(CampaignEvent::MessageUpdated {
            campaign_id,
            message: updated.clone(),
            stats,
        });
        Ok(updated)
    }

    /// Deliver one approved message: `approved -> sending -> sent | failed`.
    pub async fn send(&self, message_id: Uuid) -> Result<MessageDraft, ApprovalError> {
        let campaign_id = self
            .campaign_for_message(message_id)
            .await
            .ok_or(ApprovalError::MessageNotFound(message_id))?;

        let outbound = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            if campaign.status.is_closed() {
                return Err(ApprovalError::CampaignClosed(campaign_id));
            }
            let sending = campaign
                .update_message(message_id, |m| {
                    m.transition(MessageStatus::Sending, Utc::now())?;
                    Ok::<_, ApprovalError>(m.clone())
                })
                .ok_or(ApprovalError::MessageNotFound(message_id))??;
            let target = campaign.target(sending.target_id);
            target.and_then(|t| {
                t.contact_handle.clone().map(|handle| OutboundMessage {
                    message_id,
                    channel: sending.channel,
                    recipient: handle,
                    recipient_name: Some(t.name.clone()),
                    subject: sending.subject.clone(),
                    body: sending.body.clone(),
                })
            })
        };

        let Some(outbound) = outbound else {
            warn!(message_id = %message_id, "Target has no contact handle");
            self.finish_send(campaign_id, message_id, Err("target has no contact handle".into()))
                .await?;
            return Err(ApprovalError::MissingContact { id: message_id });
        };

        let result = match tokio::time::timeout(self.send_timeout, self.sender.send(&outbound)).await
        {
            Ok(r) => r,
            Err(_) => Err(ChannelError::Timeout {
                name: self.sender.name().to_string(),
                timeout: self.send_timeout,
            }),
        };

        match result {
            Ok(receipt) => {
                info!(
                    message_id = %message_id,
                    channel = %outbound.channel,
                    transport_id = %receipt.transport_id,
                    "Message sent"
                );
                self.finish_send(campaign_id, message_id, Ok(receipt.transport_id))
                    .await
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Message delivery failed");
                self.finish_send(campaign_id, message_id, Err(e.to_string()))
                    .await?;
                Err(ApprovalError::Delivery(e))
            }
        }
    }

    async fn finish_send(
        &self,
        campaign_id: Uuid,
        message_id: Uuid,
        outcome: Result<String, String>,
    ) -> Result<MessageDraft, ApprovalError> {
        let (updated, stats) = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            let updated = campaign
                .update_message(message_id, |m| {
                    let now = Utc::now();
                    match outcome {
                        Ok(transport_id) => {
                            m.transition(MessageStatus::Sent, now)?;
                            m.transport_id = Some(transport_id);
                            m.last_error = None;
                        }
                        Err(reason) => {
                            m.transition(MessageStatus::Failed, now)?;
                            m.last_error = Some(reason);
                        }
                    }
                    Ok::<_, ApprovalError>(m.clone())
                })
                .ok_or(ApprovalError::MessageNotFound(message_id))??;
            (updated, campaign.stats().clone())
        };
        self.persist_message(campaign_id, &updated).await;
        self.publish(CampaignEvent::MessageUpdated {
            campaign_id,
            message: updated.clone(),
            stats,
        });
        Ok(updated)
    }

    /// Approve every draft in a campaign.
    pub async fn approve_all(&self, campaign_id: Uuid) -> Result<BulkOutcome, ApprovalError> {
        let ids = self
            .message_ids_with_status(campaign_id, MessageStatus::Draft)
            .await?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            match self.approve(id).await {
                Ok(_) => outcome.succeeded.push(id),
                Err(e) => outcome.failed.push(BulkFailure {
                    message_id: id,
                    error: e.to_string(),
                }),
            }
        }
        info!(
            campaign_id = %campaign_id,
            approved = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Bulk approve complete"
        );
        Ok(outcome)
    }

    /// Send every approved message in a campaign. One failure never stops the rest.
    pub async fn send_all(&self, campaign_id: Uuid) -> Result<BulkOutcome, ApprovalError> {
        let ids = self
            .message_ids_with_status(campaign_id, MessageStatus::Approved)
            .await?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            match self.send(id).await {
                Ok(_) => outcome.succeeded.push(id),
                Err(e) => outcome.failed.push(BulkFailure {
                    message_id: id,
                    error: e.to_string(),
                }),
            }
        }
        info!(
            campaign_id = %campaign_id,
            sent = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Bulk send complete"
        );
        Ok(outcome)
    }

    async fn message_ids_with_status(
        &self,
        campaign_id: Uuid,
        status: MessageStatus,
    ) -> Result<Vec<Uuid>, ApprovalError> {
        let campaign = self
            .get(campaign_id)
            .await
            .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
        if campaign.status.is_closed() {
            return Err(ApprovalError::CampaignClosed(campaign_id));
        }
        Ok(campaign
            .messages()
            .iter()
            .filter(|m| m.status == status)
            .map(|m| m.id)
            .collect())
    }

    /// Apply a transport or tracking event (delivered, opened, clicked, replied, bounced).
    ///
    /// Events that arrive after a message already moved further along (an
    /// `opened` after `clicked`) are rejected as invalid transitions.
    pub async fn record_event(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: Option<DateTime<Utc>>,
    ) -> Result<MessageDraft, ApprovalError> {
        if !is_engagement(status) {
            let current = self
                .message(message_id)
                .await
                .ok_or(ApprovalError::MessageNotFound(message_id))?;
            return Err(ApprovalError::InvalidTransition {
                id: message_id,
                from: current.status,
                to: status,
            });
        }
        self.apply(message_id, status, at.unwrap_or_else(Utc::now), true)
            .await
    }

    /// Attach a follow-up draft to its campaign.
    pub async fn add_follow_up(
        &self,
        campaign_id: Uuid,
        draft: MessageDraft,
    ) -> Result<MessageDraft, ApprovalError> {
        let stats = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            if campaign.status.is_closed() {
                return Err(ApprovalError::CampaignClosed(campaign_id));
            }
            if !campaign.push_message(draft.clone()) {
                return Err(ApprovalError::MessageNotFound(draft.id));
            }
            campaign.stats().clone()
        };
        self.message_index
            .write()
            .await
            .insert(draft.id, campaign_id);

        if let Some(link) = &draft.follow_up {
            self.publish(CampaignEvent::FollowUpQueued {
                campaign_id,
                original_message_id: link.original_message_id,
                follow_up_message_id: draft.id,
            });
        }
        self.persist_message(campaign_id, &draft).await;
        self.publish(CampaignEvent::MessageUpdated {
            campaign_id,
            message: draft.clone(),
            stats,
        });
        Ok(draft)
    }

    pub async fn cancel(&self, campaign_id: Uuid) -> Result<Campaign, ApprovalError> {
        self.set_campaign_status(campaign_id, CampaignStatus::Cancelled)
            .await
    }

    pub async fn complete(&self, campaign_id: Uuid) -> Result<Campaign, ApprovalError> {
        self.set_campaign_status(campaign_id, CampaignStatus::Completed)
            .await
    }

    async fn set_campaign_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
    ) -> Result<Campaign, ApprovalError> {
        // Make sure store-only campaigns are loaded first.
        self.get(campaign_id)
            .await
            .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;

        let updated = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            if campaign.status.is_closed() {
                warn!(campaign_id = %campaign_id, status = %campaign.status, "Campaign already closed");
                return Err(ApprovalError::CampaignClosed(campaign_id));
            }
            campaign.set_status(status);
            campaign.clone()
        };

        info!(campaign_id = %campaign_id, status = %status, "Campaign status changed");
        if let Err(e) = self.store.update_campaign_status(campaign_id, status).await {
            warn!(campaign_id = %campaign_id, error = %e, "Failed to persist campaign status");
        }
        self.publish(CampaignEvent::CampaignStatusChanged {
            campaign_id,
            status,
        });
        Ok(updated)
    }

    async fn transition(
        &self,
        message_id: Uuid,
        to: MessageStatus,
    ) -> Result<MessageDraft, ApprovalError> {
        self.apply(message_id, to, Utc::now(), false).await
    }

    async fn apply(
        &self,
        message_id: Uuid,
        to: MessageStatus,
        at: DateTime<Utc>,
        allow_closed: bool,
    ) -> Result<MessageDraft, ApprovalError> {
        let campaign_id = self
            .campaign_for_message(message_id)
            .await
            .ok_or(ApprovalError::MessageNotFound(message_id))?;

        let (updated, stats) = {
            let mut campaigns = self.campaigns.write().await;
            let campaign = campaigns
                .get_mut(&campaign_id)
                .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
            if campaign.status.is_closed() && !allow_closed {
                return Err(ApprovalError::CampaignClosed(campaign_id));
            }
            let updated = campaign
                .update_message(message_id, |m| {
                    m.transition(to, at)?;
                    Ok::<_, ApprovalError>(m.clone())
                })
                .ok_or(ApprovalError::MessageNotFound(message_id))?
                .inspect_err(|e| warn!(message_id = %message_id, error = %e, "Rejected transition"))?;
            (updated, campaign.stats().clone())
        };

        info!(message_id = %message_id, status = %to, "Message status changed");
        self.persist_message(campaign_id, &updated).await;
        self.publish(CampaignEvent::MessageUpdated {
            campaign_id,
            message: updated.clone(),
            stats,
        });
        Ok(updated)
    }

    async fn persist_message(&self, campaign_id: Uuid, message: &MessageDraft) {
        if let Err(e) = self.store.save_message(campaign_id, message).await {
            warn!(
                message_id = %message.id,
                error = %e,
                "Failed to persist message, in-memory state kept"
            );
        }
    }
}
