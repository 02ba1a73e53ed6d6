use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use outreach::api;
use outreach::campaign::{CampaignBook, CampaignService, Channel};
use outreach::channels::{
    ChannelRouter, DryRunSender, EmailConfig, EmailSender, MessageSender, WebhookConfig,
    WebhookSender,
};
use outreach::config::{FollowUpConfig, PipelineConfig, ServerConfig};
use outreach::conversation::{ConversationRouter, SessionStore};
use outreach::discovery::{
    DiscoveryAdapter, HttpSource, HttpSourceConfig, StaticSource, TargetDiscovery, TargetSource,
};
use outreach::followup::{FollowUpScheduler, spawn_ticker};
use outreach::generator::{LlmDraftWriter, MessageGenerator, TemplateCatalog};
use outreach::intent::{FallbackClassifier, IntentClassifier, KeywordClassifier, LlmIntentClassifier};
use outreach::llm::{LlmConfig, create_provider};
use outreach::pipeline::CampaignOrchestrator;
use outreach::store::{CampaignStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let server = ServerConfig::from_env();

    // Keep the guard alive for the life of the process or buffered lines are lost.
    let (file_layer, _log_guard) = match &server.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "outreach.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let pipeline_config = PipelineConfig::from_env();
    let follow_up_config = FollowUpConfig::from_env();
    let llm_config = LlmConfig::from_env();

    eprintln!("📣 Outreach v{}", env!("CARGO_PKG_VERSION"));
    match &llm_config {
        Some(c) => eprintln!("   Model: {}", c.model),
        None => eprintln!("   Model: none (keyword classifier, template writer)"),
    }
    eprintln!("   API: http://0.0.0.0:{}/api/campaigns", server.port);
    eprintln!("   Events: ws://0.0.0.0:{}/ws", server.port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn CampaignStore> = Arc::new(
        LibSqlBackend::new_local(&server.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    server.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", server.db_path.display());

    // ── Delivery ─────────────────────────────────────────────────────────
    let mut router = ChannelRouter::new();
    router = match EmailConfig::from_env() {
        Some(config) => router.with(Channel::Email, Arc::new(EmailSender::new(config))),
        None => {
            warn!("SMTP not configured, email is dry-run");
            router.with(Channel::Email, Arc::new(DryRunSender::new()))
        }
    };
    for channel in [Channel::Dm, Channel::Whatsapp] {
        let sender: Arc<dyn MessageSender> = match WebhookConfig::from_env(channel) {
            Some(config) => Arc::new(WebhookSender::new(channel, config)),
            None => Arc::new(DryRunSender::new()),
        };
        router = router.with(channel, sender);
    }
    let sender: Arc<dyn MessageSender> = Arc::new(router);

    // ── Pipeline ─────────────────────────────────────────────────────────
    let llm = match &llm_config {
        Some(config) => Some(create_provider(config).context("creating LLM provider")?),
        None => None,
    };

    let generator = Arc::new(
        MessageGenerator::new(TemplateCatalog::builtin(), Default::default())
            .with_sender_name(&server.sender_name),
    );

    let classifier: Arc<dyn IntentClassifier> = Arc::new(FallbackClassifier::new(
        llm.clone()
            .map(|llm| Arc::new(LlmIntentClassifier::new(llm)) as Arc<dyn IntentClassifier>),
        Arc::new(KeywordClassifier::new()),
    ));

    let source: Arc<dyn TargetSource> = match HttpSourceConfig::from_env() {
        Some(config) => {
            info!(url = %config.url, "Using HTTP discovery source");
            Arc::new(HttpSource::new(config))
        }
        None => match &server.targets_file {
            Some(path) => Arc::new(
                StaticSource::from_file(path)
                    .with_context(|| format!("loading targets from {}", path.display()))?,
            ),
            None => {
                warn!("No discovery source configured, campaigns will find no targets");
                Arc::new(StaticSource::new(Vec::new()))
            }
        },
    };
    let discovery: Arc<dyn TargetDiscovery> = Arc::new(DiscoveryAdapter::new(source));

    let mut orchestrator = CampaignOrchestrator::new(classifier, discovery, generator.clone())
        .with_store(store.clone())
        .with_config(pipeline_config);
    if let Some(llm) = llm {
        orchestrator = orchestrator.with_writer(Arc::new(LlmDraftWriter::new(llm, generator.clone())));
    }
    let orchestrator = Arc::new(orchestrator);

    // ── Campaigns, follow-ups, conversation ──────────────────────────────
    let book = CampaignBook::new(store, sender);
    let follow_ups = FollowUpScheduler::new(book.clone(), generator, follow_up_config.clone());
    let _ticker = if follow_up_config.enabled {
        Some(spawn_ticker(follow_ups.clone()).context("starting follow-up ticker")?)
    } else {
        info!("Follow-up ticker disabled");
        None
    };

    let service = Arc::new(CampaignService::new(orchestrator, book, follow_ups));
    let sessions = Arc::new(SessionStore::new(server.session_ttl));
    let conversation = Arc::new(ConversationRouter::new(service.clone(), sessions));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api::app(service, conversation);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("binding port {}", server.port))?;
    info!(port = server.port, "Outreach server listening");
    axum::serve(listener, app).await.context("serving HTTP")?;

    Ok(())
}
