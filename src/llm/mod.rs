//! LLM integration.
//!
//! Completions go through rig-core; the rest of the crate only sees the
//! `LlmProvider` trait.

mod costs;
pub mod provider;
mod reply;
pub(crate) mod retry;
mod rig_adapter;

pub use provider::*;
pub use reply::parse_json_reply;
pub use retry::RetryPolicy;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// `None` when `ANTHROPIC_API_KEY` is unset (LLM features disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        Some(Self {
            api_key: SecretString::from(api_key),
            model: std::env::var("OUTREACH_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        })
    }
}

/// Create an Anthropic-backed provider.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;
    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_builds_without_network() {
        let config = LlmConfig {
            api_key: SecretString::from("sk-test".to_string()),
            model: "claude-3-5-haiku-latest".to_string(),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "claude-3-5-haiku-latest");
        assert!(provider.cost_per_token().0 < provider.cost_per_token().1);
    }
}
