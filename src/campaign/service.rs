//! Command and query surface over the orchestrator, the campaign book, and
//! the follow-up scheduler. Both the REST API and the conversation router
//! go through here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::approval::CampaignBook;
use super::events::CampaignEvent;
use super::model::{CampaignStats, CampaignStatus, CampaignSummary, Channel, MessageDraft, Tone};
use crate::error::{ApprovalError, CampaignError};
use crate::followup::FollowUpScheduler;
use crate::pipeline::{CampaignOrchestrator, CancelFlag, ProgressEvent, RunRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub targets_found: usize,
    pub messages_generated: usize,
    pub dropped_targets: usize,
}

/// Reply to a campaign-creation command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub success: bool,
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CampaignError>,
    /// False when the campaign only lives in memory.
    pub saved: bool,
}

/// Current state of one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStatusView {
    pub campaign_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub channel: Channel,
    pub stats: CampaignStats,
    pub progress: u8,
}

pub struct CampaignService {
    orchestrator: Arc<CampaignOrchestrator>,
    book: Arc<CampaignBook>,
    follow_ups: Arc<FollowUpScheduler>,
}

impl CampaignService {
    pub fn new(
        orchestrator: Arc<CampaignOrchestrator>,
        book: Arc<CampaignBook>,
        follow_ups: Arc<FollowUpScheduler>,
    ) -> Self {
        Self {
            orchestrator,
            book,
            follow_ups,
        }
    }

    pub fn book(&self) -> &Arc<CampaignBook> {
        &self.book
    }

    pub fn follow_ups(&self) -> &Arc<FollowUpScheduler> {
        &self.follow_ups
    }

    /// Run the pipeline and register the result. Progress is broadcast.
    pub async fn create(&self, request: RunRequest) -> CreateResponse {
        let book = self.book.clone();
        let observer = move |e: &ProgressEvent| {
            book.publish(CampaignEvent::Progress {
                run_id: e.run_id,
                stage: e.stage,
                progress: e.progress,
                message: e.message.clone(),
            });
        };

        let result = self
            .orchestrator
            .run(request, Some(&observer), &CancelFlag::new())
            .await;

        let Some(campaign) = result.campaign else {
            return CreateResponse {
                success: false,
                run_id: result.run_id,
                campaign_id: None,
                name: None,
                stats: None,
                error: result.error,
                saved: false,
            };
        };

        let stats = RunStats {
            targets_found: campaign.targets().len(),
            messages_generated: campaign.messages().len(),
            dropped_targets: result.dropped_targets,
        };
        let (campaign_id, name) = (campaign.id, campaign.name.clone());

        if let Err(e) = self.follow_ups.add_default_rule(&campaign).await {
            warn!(campaign_id = %campaign_id, error = %e, "Default follow-up rule not added");
        }
        self.book.insert(campaign).await;
        info!(campaign_id = %campaign_id, saved = result.saved, "Campaign created");

        CreateResponse {
            success: true,
            run_id: result.run_id,
            campaign_id: Some(campaign_id),
            name: Some(name),
            stats: Some(stats),
            error: None,
            saved: result.saved,
        }
    }

    /// Live campaigns merged with stored ones, newest first.
    pub async fn list(&self, user_id: Option<&str>, limit: usize) -> Vec<CampaignSummary> {
        let mut summaries = self.book.list(user_id).await;
        match self.book.store().list_campaigns(user_id, limit).await {
            Ok(stored) => {
                for summary in stored {
                    if !summaries.iter().any(|s| s.id == summary.id) {
                        summaries.push(summary);
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list stored campaigns"),
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        summaries
    }

    pub async fn status(&self, campaign_id: Uuid) -> Option<CampaignStatusView> {
        let campaign = self.book.get(campaign_id).await?;
        Some(CampaignStatusView {
            campaign_id: campaign.id,
            name: campaign.name.clone(),
            status: campaign.status,
            channel: campaign.intent.channel,
            stats: campaign.stats().clone(),
            progress: campaign.progress_percent(),
        })
    }

    /// Re-render a draft through the template path, optionally in a new tone.
    pub async fn regenerate(
        &self,
        message_id: Uuid,
        tone: Option<Tone>,
    ) -> Result<MessageDraft, ApprovalError> {
        let campaign_id = self
            .book
            .campaign_for_message(message_id)
            .await
            .ok_or(ApprovalError::MessageNotFound(message_id))?;
        let campaign = self
            .book
            .get(campaign_id)
            .await
            .ok_or(ApprovalError::CampaignNotFound(campaign_id))?;
        let message = campaign
            .message(message_id)
            .ok_or(ApprovalError::MessageNotFound(message_id))?;
        if message.status != super::model::MessageStatus::Draft {
            return Err(ApprovalError::NotEditable {
                id: message_id,
                status: message.status,
            });
        }
        let target = campaign
            .target(message.target_id)
            .ok_or(ApprovalError::MessageNotFound(message_id))?;

        let intent = campaign
            .intent
            .clone()
            .with_tone(tone.unwrap_or(message.tone));
        let fresh = self.orchestrator.generator().generate(&intent, target, None);
        self.book.replace_content(message_id, fresh).await
    }
}
