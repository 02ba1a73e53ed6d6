//! Events broadcast to subscribers (WebSocket clients, tests).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{CampaignStats, CampaignStatus, CampaignSummary, MessageDraft, MessageStatus};
use crate::pipeline::orchestrator::PipelineStage;

/// Everything a live client may be told about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEvent {
    /// Sent once to each client on connect.
    Sync { campaigns: Vec<CampaignSummary> },
    /// A pipeline run advanced.
    Progress {
        run_id: Uuid,
        stage: PipelineStage,
        progress: u8,
        message: String,
    },
    CampaignCreated { campaign: CampaignSummary },
    CampaignStatusChanged {
        campaign_id: Uuid,
        status: CampaignStatus,
    },
    MessageUpdated {
        campaign_id: Uuid,
        message: MessageDraft,
        stats: CampaignStats,
    },
    FollowUpQueued {
        campaign_id: Uuid,
        original_message_id: Uuid,
        follow_up_message_id: Uuid,
    },
}

impl CampaignEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sync { .. } => "sync",
            Self::Progress { .. } => "progress",
            Self::CampaignCreated { .. } => "campaign_created",
            Self::CampaignStatusChanged { .. } => "campaign_status_changed",
            Self::MessageUpdated { .. } => "message_updated",
            Self::FollowUpQueued { .. } => "follow_up_queued",
        }
    }

    /// The new message status, for message events.
    pub fn message_status(&self) -> Option<MessageStatus> {
        match self {
            Self::MessageUpdated { message, .. } => Some(message.status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let event = CampaignEvent::CampaignStatusChanged {
            campaign_id: Uuid::nil(),
            status: CampaignStatus::Cancelled,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "campaign_status_changed");
        assert_eq!(json["status"], "cancelled");
    }

    #[test]
    fn progress_event_roundtrip() {
        let event = CampaignEvent::Progress {
            run_id: Uuid::new_v4(),
            stage: PipelineStage::Discovering,
            progress: 40,
            message: "Finding targets".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: CampaignEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.label(), "progress");
    }
}
