//! Error types for the outreach engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::model::MessageStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Follow-up error: {0}")]
    FollowUp(#[from] FollowUpError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outbound delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} is not configured")]
    NotConfigured { name: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid recipient for channel {name}: {reason}")]
    InvalidRecipient { name: String, reason: String },

    #[error("Send on channel {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stage-level pipeline failures. Each maps onto a user-facing [`CampaignError`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Request needs clarification (confidence {confidence:.2})")]
    NeedsClarification { confidence: f32 },

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("No targets found")]
    NoTargetsFound,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Stage {stage} timed out after {timeout:?}")]
    Timeout { stage: String, timeout: Duration },

    #[error("Pipeline cancelled before stage {stage}")]
    Cancelled { stage: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Approval state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Campaign {0} not found")]
    CampaignNotFound(Uuid),

    #[error("Message {0} not found")]
    MessageNotFound(Uuid),

    #[error("Message {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Message {id} can only be edited in draft, current status is {status}")]
    NotEditable { id: Uuid, status: MessageStatus },

    #[error("Campaign {0} is closed")]
    CampaignClosed(Uuid),

    #[error("Message {id} has no contact handle")]
    MissingContact { id: Uuid },

    #[error("Delivery failed: {0}")]
    Delivery(#[from] ChannelError),
}

/// Follow-up scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum FollowUpError {
    #[error("Rule {0} not found")]
    RuleNotFound(Uuid),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Scheduling failed for message {message_id}: {reason}")]
    Scheduling { message_id: Uuid, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),
}

/// Machine-readable error codes exposed on the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ClassificationFailed,
    NeedsClarification,
    NoTargetsFound,
    DiscoveryFailed,
    GenerationFailed,
    PersistenceUnavailable,
    DeliveryFailed,
    TriggerSchedulingFailed,
    Timeout,
    Cancelled,
    NotFound,
    InvalidRequest,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ClassificationFailed => "CLASSIFICATION_FAILED",
            Self::NeedsClarification => "NEEDS_CLARIFICATION",
            Self::NoTargetsFound => "NO_TARGETS_FOUND",
            Self::DiscoveryFailed => "DISCOVERY_FAILED",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::PersistenceUnavailable => "PERSISTENCE_UNAVAILABLE",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::TriggerSchedulingFailed => "TRIGGER_SCHEDULING_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidRequest => "INVALID_REQUEST",
        };
        f.write_str(s)
    }
}

/// User-facing structured error returned by the command surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CampaignError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl From<&PipelineError> for CampaignError {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Classification(_) | PipelineError::Llm(_) => {
                CampaignError::new(ErrorCode::ClassificationFailed, err.to_string())
                    .with_suggestion(
                        "Please rephrase, e.g. \"Reach out to 10 hotels in NYC about partnerships\".",
                    )
            }
            PipelineError::NeedsClarification { .. } => {
                CampaignError::new(ErrorCode::NeedsClarification, err.to_string()).with_suggestion(
                    "Say who you want to reach, where, and why (e.g. \"5 gyms in Austin about a sponsorship\").",
                )
            }
            PipelineError::Discovery(_) => {
                CampaignError::new(ErrorCode::DiscoveryFailed, err.to_string())
            }
            PipelineError::NoTargetsFound => CampaignError::new(
                ErrorCode::NoTargetsFound,
                "No matching targets were found for this request.",
            )
            .with_suggestion("Try adjusting criteria: a broader location, niche, or target type."),
            PipelineError::Generation(_) => {
                CampaignError::new(ErrorCode::GenerationFailed, err.to_string())
            }
            PipelineError::Timeout { .. } => CampaignError::new(ErrorCode::Timeout, err.to_string()),
            PipelineError::Cancelled { .. } => {
                CampaignError::new(ErrorCode::Cancelled, err.to_string())
            }
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
