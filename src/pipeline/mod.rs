//! Campaign creation pipeline.
//!
//! A natural-language request flows through:
//! 1. `IntentClassifier::classify()` - structured intent
//! 2. `ChannelSelector::select()` - rule-based channel choice
//! 3. `TargetDiscovery::discover()` - validated, ranked targets
//! 4. `DraftWriter::write()` - one draft per target, bounded concurrency
//! 5. `Campaign::assemble()` - stats computed, every message in `draft`
//!
//! **Nothing is sent here.** Every draft waits for approval.

pub mod channel;
pub mod orchestrator;

pub use channel::{ChannelCandidate, ChannelDecision, ChannelSelector};
pub use orchestrator::{
    CampaignOrchestrator, CampaignResult, CancelFlag, PipelineStage, ProgressEvent,
    ProgressObserver, RunRequest,
};
