//! Campaign aggregate, approval workflow, events, export, and the service
//! facade used by the API and conversation router.

pub mod approval;
pub mod events;
pub mod export;
pub mod model;
pub mod service;

pub use approval::{BulkFailure, BulkOutcome, CampaignBook};
pub use events::CampaignEvent;
pub use export::{ExportFormat, ExportRecord};
pub use model::{
    Campaign, CampaignSettings, CampaignStats, CampaignStatus, CampaignSummary, Channel, Intent,
    MessageDraft, MessageStatus, Purpose, Target, TargetType, Tone,
};
pub use service::{CampaignService, CampaignStatusView, CreateResponse, RunStats};
