//! Campaign orchestrator.
//!
//! Stages run in a fixed order:
//!
//! ```text
//! classifying → selecting_channel → discovering → generating → assembling → ready
//!      └──────────────┴─────────────────┴─────────────┴──────────► failed
//! ```
//!
//! Failures are terminal and never produce a partial campaign. Each adapter
//! call runs under the configured stage timeout, cancellation is checked
//! before every stage, and the observer sees one event per transition
//! before the next stage starts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::channel::ChannelSelector;
use crate::campaign::model::{Campaign, CampaignSettings, Channel, Intent, MessageDraft, Target};
use crate::config::PipelineConfig;
use crate::discovery::{TargetDiscovery, TargetQuery};
use crate::error::{CampaignError, PipelineError};
use crate::generator::{DraftWriter, GenerationContext, MessageGenerator};
use crate::intent::IntentClassifier;
use crate::store::CampaignStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Classifying,
    SelectingChannel,
    Discovering,
    Generating,
    Assembling,
    Ready,
    Failed,
}

impl PipelineStage {
    /// Progress reported when the stage is entered.
    pub fn progress(&self) -> u8 {
        match self {
            Self::Classifying => 10,
            Self::SelectingChannel => 25,
            Self::Discovering => 40,
            Self::Generating => 60,
            Self::Assembling => 90,
            Self::Ready => 100,
            Self::Failed => 0,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Classifying => "classifying",
            Self::SelectingChannel => "selecting_channel",
            Self::Discovering => "discovering",
            Self::Generating => "generating",
            Self::Assembling => "assembling",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub stage: PipelineStage,
    pub message: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Receives progress synchronously and in order.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Cooperative cancellation, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One campaign-creation request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub input: String,
    pub user_id: Option<String>,
    pub context: Option<GenerationContext>,
    /// Overrides the orchestrator's default campaign settings.
    pub settings: Option<CampaignSettings>,
}

impl RunRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CampaignResult {
    pub run_id: Uuid,
    pub success: bool,
    pub campaign: Option<Campaign>,
    pub error: Option<CampaignError>,
    /// Whether the campaign reached durable storage.
    pub saved: bool,
    /// Discovery records dropped by validation or dedupe.
    pub dropped_targets: usize,
}

impl CampaignResult {
    fn failed(run_id: Uuid, err: &PipelineError) -> Self {
        Self {
            run_id,
            success: false,
            campaign: None,
            error: Some(CampaignError::from(err)),
            saved: false,
            dropped_targets: 0,
        }
    }
}

/// Emits progress with a non-decreasing percentage.
struct Emitter<'a> {
    run_id: Uuid,
    observer: Option<&'a dyn ProgressObserver>,
    last_progress: u8,
}

impl Emitter<'_> {
    fn emit(&mut self, stage: PipelineStage, message: impl Into<String>, payload: Option<Value>) {
        self.last_progress = self.last_progress.max(stage.progress());
        let event = ProgressEvent {
            run_id: self.run_id,
            stage,
            message: message.into(),
            progress: self.last_progress,
            payload,
        };
        if let Some(observer) = self.observer {
            observer.on_progress(&event);
        }
    }
}

pub struct CampaignOrchestrator {
    classifier: Arc<dyn IntentClassifier>,
    selector: ChannelSelector,
    discovery: Arc<dyn TargetDiscovery>,
    writer: Arc<dyn DraftWriter>,
    fallback: Arc<MessageGenerator>,
    store: Option<Arc<dyn CampaignStore>>,
    config: PipelineConfig,
    settings: CampaignSettings,
}

impl CampaignOrchestrator {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        discovery: Arc<dyn TargetDiscovery>,
        generator: Arc<MessageGenerator>,
    ) -> Self {
        Self {
            classifier,
            selector: ChannelSelector::new(),
            discovery,
            writer: generator.clone(),
            fallback: generator,
            store: None,
            config: PipelineConfig::default(),
            settings: CampaignSettings::default(),
        }
    }

    /// Use a richer writer; the template generator stays as the fallback.
    pub fn with_writer(mut self, writer: Arc<dyn DraftWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CampaignStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_settings(mut self, settings: CampaignSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn generator(&self) -> &Arc<MessageGenerator> {
        &self.fallback
    }

    /// Run the whole pipeline for one request.
    pub async fn run(
        &self,
        request: RunRequest,
        observer: Option<&dyn ProgressObserver>,
        cancel: &CancelFlag,
    ) -> CampaignResult {
        let run_id = Uuid::new_v4();
        let mut emitter = Emitter {
            run_id,
            observer,
            last_progress: 0,
        };

        info!(run_id = %run_id, input_len = request.input.len(), "Campaign run started");

        match self.execute(&request, &mut emitter, cancel).await {
            Ok((campaign, dropped)) => {
                let saved = self.persist(&campaign).await;
                emitter.emit(
                    PipelineStage::Ready,
                    format!("Campaign ready with {} messages", campaign.messages().len()),
                    Some(json!({
                        "campaign_id": campaign.id,
                        "targets": campaign.targets().len(),
                        "messages": campaign.messages().len(),
                        "saved": saved,
                    })),
                );
                info!(
                    run_id = %run_id,
                    campaign_id = %campaign.id,
                    targets = campaign.targets().len(),
                    saved,
                    "Campaign run finished"
                );
                CampaignResult {
                    run_id,
                    success: true,
                    campaign: Some(campaign),
                    error: None,
                    saved,
                    dropped_targets: dropped,
                }
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Campaign run failed");
                let result = CampaignResult::failed(run_id, &e);
                emitter.emit(
                    PipelineStage::Failed,
                    e.to_string(),
                    result.error.as_ref().map(|err| json!({ "code": err.code })),
                );
                result
            }
        }
    }

    async fn execute(
        &self,
        request: &RunRequest,
        emitter: &mut Emitter<'_>,
        cancel: &CancelFlag,
    ) -> Result<(Campaign, usize), PipelineError> {
        let stage_timeout = self.config.stage_timeout;

        // Classifying
        check_cancel(cancel, PipelineStage::Classifying)?;
        emitter.emit(PipelineStage::Classifying, "Understanding your request", None);
        let intent = timeout(stage_timeout, self.classifier.classify(&request.input))
            .await
            .map_err(|_| stage_timed_out(PipelineStage::Classifying, stage_timeout))??;
        if self.config.reject_low_confidence
            && intent.needs_clarification(self.config.clarification_threshold)
        {
            return Err(PipelineError::NeedsClarification {
                confidence: intent.confidence,
            });
        }
        info!(
            classifier = self.classifier.name(),
            target_type = %intent.target_type,
            purpose = %intent.purpose,
            count = intent.count,
            "Intent classified"
        );

        // Selecting channel
        check_cancel(cancel, PipelineStage::SelectingChannel)?;
        let (intent, rationale) = self.resolve_channel(intent);
        emitter.emit(
            PipelineStage::SelectingChannel,
            format!("Using {} ({})", intent.channel, rationale),
            Some(json!({ "intent": &intent, "rationale": &rationale })),
        );

        // Discovering
        check_cancel(cancel, PipelineStage::Discovering)?;
        emitter.emit(
            PipelineStage::Discovering,
            format!("Finding {} {}", intent.count, intent.target_type.plural()),
            None,
        );
        let query = TargetQuery::from_intent(&intent);
        let outcome = timeout(stage_timeout, self.discovery.discover(&query))
            .await
            .map_err(|_| stage_timed_out(PipelineStage::Discovering, stage_timeout))??;
        if outcome.targets.is_empty() {
            return Err(PipelineError::NoTargetsFound);
        }
        let dropped = outcome.dropped;
        let targets = outcome.targets;

        // Generating
        check_cancel(cancel, PipelineStage::Generating)?;
        emitter.emit(
            PipelineStage::Generating,
            format!("Drafting {} messages", targets.len()),
            Some(json!({ "targets_found": targets.len(), "dropped": dropped })),
        );
        let messages = self
            .generate_all(&intent, &targets, request.context.as_ref())
            .await?;

        // Assembling
        check_cancel(cancel, PipelineStage::Assembling)?;
        emitter.emit(PipelineStage::Assembling, "Assembling campaign", None);
        let settings = request
            .settings
            .clone()
            .unwrap_or_else(|| self.settings.clone());
        let campaign = Campaign::assemble(
            intent,
            rationale,
            targets,
            messages,
            settings,
            request.user_id.clone(),
        );
        Ok((campaign, dropped))
    }

    fn resolve_channel(&self, intent: Intent) -> (Intent, String) {
        if self.config.skip_channel_selection {
            return match intent.channel {
                Channel::Unset => (
                    intent.with_channel(Channel::Email),
                    "channel selection skipped".to_string(),
                ),
                _ => (intent, "explicit".to_string()),
            };
        }
        let decision = self.selector.select(&intent);
        (intent.with_channel(decision.channel), decision.rationale)
    }

    async fn generate_all(
        &self,
        intent: &Intent,
        targets: &[Target],
        context: Option<&GenerationContext>,
    ) -> Result<Vec<MessageDraft>, PipelineError> {
        if targets.is_empty() {
            return Err(PipelineError::Generation("no targets reached the generator".into()));
        }
        let concurrency = self.config.generation_concurrency.max(1);
        // Futures are built eagerly; a borrowing closure inside the stream
        // is not general over the target lifetime.
        let pending: Vec<_> = targets
            .iter()
            .map(|target| self.generate_one(intent, target, context))
            .collect();
        let drafts: Vec<MessageDraft> = stream::iter(pending)
            .buffered(concurrency)
            .collect()
            .await;
        Ok(drafts)
    }

    /// Writer output, or the template rendering when the writer fails or stalls.
    async fn generate_one(
        &self,
        intent: &Intent,
        target: &Target,
        context: Option<&GenerationContext>,
    ) -> MessageDraft {
        let stage_timeout = self.config.stage_timeout;
        match timeout(stage_timeout, self.writer.write(intent, target, context)).await {
            Ok(Ok(draft)) => draft,
            Ok(Err(e)) => {
                warn!(
                    writer = self.writer.name(),
                    target_id = %target.id,
                    error = %e,
                    "Draft writer failed, using template"
                );
                self.fallback.generate(intent, target, context)
            }
            Err(_) => {
                warn!(
                    writer = self.writer.name(),
                    target_id = %target.id,
                    timeout_secs = stage_timeout.as_secs(),
                    "Draft writer timed out, using template"
                );
                self.fallback.generate(intent, target, context)
            }
        }
    }

    /// Best-effort save. Failure leaves the in-memory result intact.
    async fn persist(&self, campaign: &Campaign) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.save_campaign(campaign).await {
            Ok(()) => true,
            Err(e) => {
                error!(campaign_id = %campaign.id, error = %e, "Failed to persist campaign");
                false
            }
        }
    }
}

fn check_cancel(cancel: &CancelFlag, stage: PipelineStage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled {
            stage: stage.to_string(),
        });
    }
    Ok(())
}

fn stage_timed_out(stage: PipelineStage, limit: Duration) -> PipelineError {
    PipelineError::Timeout {
        stage: stage.to_string(),
        timeout: limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::campaign::model::{MessageStatus, Purpose, TargetType};
    use crate::discovery::DiscoveryOutcome;
    use crate::error::ErrorCode;
    use crate::store::MemoryStore;

    struct StubClassifier(Intent);

    #[async_trait]
    impl IntentClassifier for StubClassifier {
        fn name(&self) -> &str {
            "stub"
        }

        async fn classify(&self, _raw: &str) -> Result<Intent, PipelineError> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl IntentClassifier for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn classify(&self, _raw: &str) -> Result<Intent, PipelineError> {
            Err(PipelineError::Classification("malformed response".into()))
        }
    }

    struct StubDiscovery {
        targets: Vec<Target>,
        delay: Duration,
    }

    #[async_trait]
    impl TargetDiscovery for StubDiscovery {
        async fn discover(&self, _query: &TargetQuery) -> Result<DiscoveryOutcome, PipelineError> {
            tokio::time::sleep(self.delay).await;
            Ok(DiscoveryOutcome {
                targets: self.targets.clone(),
                dropped: 1,
            })
        }
    }

    struct BrokenWriter;

    #[async_trait]
    impl DraftWriter for BrokenWriter {
        fn name(&self) -> &str {
            "broken"
        }

        async fn write(
            &self,
            _intent: &Intent,
            _target: &Target,
            _context: Option<&GenerationContext>,
        ) -> Result<MessageDraft, PipelineError> {
            Err(PipelineError::Generation("model unavailable".into()))
        }
    }

    fn nyc_intent() -> Intent {
        Intent::new(TargetType::RestaurantOwner, Purpose::Partnership)
            .with_location("New York, NY")
            .with_count(3)
            .with_confidence(0.9)
    }

    fn three_targets() -> Vec<Target> {
        vec![
            Target::new("Lou Rossi").with_company("Rossi's").with_contact("lou@rossis.com"),
            Target::new("Mae Kim").with_company("Seoul Kitchen").with_contact("mae@seoul.nyc"),
            Target::new("Sal Diaz").with_company("Taqueria Sal"),
        ]
    }

    fn orchestrator(intent: Intent, targets: Vec<Target>) -> CampaignOrchestrator {
        CampaignOrchestrator::new(
            Arc::new(StubClassifier(intent)),
            Arc::new(StubDiscovery {
                targets,
                delay: Duration::ZERO,
            }),
            Arc::new(MessageGenerator::default()),
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl Fn(&ProgressEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone()))
    }

    #[tokio::test]
    async fn restaurants_in_nyc_campaign() {
        let orch = orchestrator(nyc_intent(), three_targets());
        let result = orch
            .run(
                RunRequest::new("Reach out to 3 restaurants in NYC about partnerships"),
                None,
                &CancelFlag::new(),
            )
            .await;
        assert!(result.success);
        let campaign = result.campaign.unwrap();
        assert_eq!(campaign.targets().len(), 3);
        assert_eq!(campaign.messages().len(), 3);
        assert!(campaign.messages().iter().all(|m| m.status == MessageStatus::Draft));
        assert_eq!(campaign.intent.channel, Channel::Email);
        assert_eq!(campaign.stats(), &campaign.recompute_stats());
        assert_eq!(result.dropped_targets, 1);
        assert!(!result.saved);
    }

    #[tokio::test]
    async fn empty_discovery_is_no_targets_found() {
        let orch = orchestrator(nyc_intent(), Vec::new());
        let result = orch.run(RunRequest::new("x"), None, &CancelFlag::new()).await;
        assert!(!result.success);
        assert!(result.campaign.is_none());
        let err = result.error.unwrap();
        assert_eq!(err.code, ErrorCode::NoTargetsFound);
        assert!(err.suggestion.is_some());
    }

    #[tokio::test]
    async fn progress_is_ordered_and_monotonic() {
        let orch = orchestrator(nyc_intent(), three_targets());
        let (events, observer) = recorder();
        let result = orch
            .run(RunRequest::new("x"), Some(&observer), &CancelFlag::new())
            .await;
        assert!(result.success);

        let events = events.lock().unwrap();
        let stages: Vec<_> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                PipelineStage::Classifying,
                PipelineStage::SelectingChannel,
                PipelineStage::Discovering,
                PipelineStage::Generating,
                PipelineStage::Assembling,
                PipelineStage::Ready,
            ]
        );
        assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert_eq!(events.last().unwrap().progress, 100);
        assert!(events.iter().all(|e| e.run_id == result.run_id));
    }

    #[tokio::test]
    async fn failure_event_keeps_progress() {
        let orch = orchestrator(nyc_intent(), Vec::new());
        let (events, observer) = recorder();
        orch.run(RunRequest::new("x"), Some(&observer), &CancelFlag::new())
            .await;
        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.stage, PipelineStage::Failed);
        assert_eq!(last.progress, PipelineStage::Discovering.progress());
        assert_eq!(last.payload.as_ref().unwrap()["code"], "NO_TARGETS_FOUND");
    }

    #[tokio::test]
    async fn classification_failure_short_circuits() {
        let orch = CampaignOrchestrator::new(
            Arc::new(FailingClassifier),
            Arc::new(StubDiscovery {
                targets: three_targets(),
                delay: Duration::ZERO,
            }),
            Arc::new(MessageGenerator::default()),
        );
        let result = orch.run(RunRequest::new("???"), None, &CancelFlag::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::ClassificationFailed);
    }

    #[tokio::test]
    async fn low_confidence_needs_clarification() {
        let orch = orchestrator(nyc_intent().with_confidence(0.2), three_targets());
        let result = orch.run(RunRequest::new("hmm"), None, &CancelFlag::new()).await;
        assert_eq!(result.error.unwrap().code, ErrorCode::NeedsClarification);

        let lenient = orchestrator(nyc_intent().with_confidence(0.2), three_targets()).with_config(
            PipelineConfig {
                reject_low_confidence: false,
                ..PipelineConfig::default()
            },
        );
        assert!(lenient.run(RunRequest::new("hmm"), None, &CancelFlag::new()).await.success);
    }

    #[tokio::test]
    async fn slow_discovery_times_out() {
        let orch = CampaignOrchestrator::new(
            Arc::new(StubClassifier(nyc_intent())),
            Arc::new(StubDiscovery {
                targets: three_targets(),
                delay: Duration::from_secs(5),
            }),
            Arc::new(MessageGenerator::default()),
        )
        .with_config(PipelineConfig {
            stage_timeout: Duration::from_millis(50),
            ..PipelineConfig::default()
        });
        let result = orch.run(RunRequest::new("x"), None, &CancelFlag::new()).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn cancelled_run_builds_nothing() {
        let orch = orchestrator(nyc_intent(), three_targets());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = orch.run(RunRequest::new("x"), None, &cancel).await;
        assert!(!result.success);
        assert!(result.campaign.is_none());
        assert_eq!(result.error.unwrap().code, ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn cancel_from_observer_stops_before_next_stage() {
        let orch = orchestrator(nyc_intent(), three_targets());
        let cancel = CancelFlag::new();
        let trip = cancel.clone();
        let observer = move |e: &ProgressEvent| {
            if e.stage == PipelineStage::Discovering {
                trip.cancel();
            }
        };
        let result = orch.run(RunRequest::new("x"), Some(&observer), &cancel).await;
        assert!(result.campaign.is_none());
        assert_eq!(result.error.unwrap().code, ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn writer_failure_falls_back_to_templates() {
        let orch = orchestrator(nyc_intent(), three_targets()).with_writer(Arc::new(BrokenWriter));
        let result = orch.run(RunRequest::new("x"), None, &CancelFlag::new()).await;
        assert!(result.success);
        let campaign = result.campaign.unwrap();
        assert!(campaign
            .messages()
            .iter()
            .all(|m| m.template_id == "restaurant.partnership"));
    }

    #[tokio::test]
    async fn skip_channel_selection_defaults_to_email() {
        let intent = Intent::new(TargetType::Creator, Purpose::BrandDeal).with_confidence(0.9);
        let orch = orchestrator(intent, three_targets()).with_config(PipelineConfig {
            skip_channel_selection: true,
            ..PipelineConfig::default()
        });
        let result = orch.run(RunRequest::new("x"), None, &CancelFlag::new()).await;
        let campaign = result.campaign.unwrap();
        assert_eq!(campaign.intent.channel, Channel::Email);
        assert_eq!(campaign.channel_rationale, "channel selection skipped");
    }

    #[tokio::test]
    async fn saved_flag_reflects_store() {
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(nyc_intent(), three_targets()).with_store(store.clone());
        let result = orch
            .run(RunRequest::new("x").with_user("u1"), None, &CancelFlag::new())
            .await;
        assert!(result.saved);
        let id = result.campaign.unwrap().id;
        let loaded = store.load_campaign(id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id.as_deref(), Some("u1"));
    }
}
