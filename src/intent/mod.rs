//! Intent classification: free text in, structured `Intent` out.
//!
//! Two strategies share one trait. The LLM classifier is preferred when a
//! provider is configured; the keyword classifier is deterministic and
//! offline, and takes over when the LLM is unavailable or fails.

pub mod keyword;
pub mod llm;

pub use keyword::KeywordClassifier;
pub use llm::LlmIntentClassifier;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::campaign::model::Intent;
use crate::error::PipelineError;

/// Turns a raw request into a validated `Intent`.
///
/// Implementations never return a partially populated intent: every enum
/// field is coerced to a known member or its fallback, and any failure is a
/// `PipelineError::Classification`.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, raw: &str) -> Result<Intent, PipelineError>;
}

/// Uses `primary` when present, falling back on any primary failure.
pub struct FallbackClassifier {
    primary: Option<Arc<dyn IntentClassifier>>,
    fallback: Arc<dyn IntentClassifier>,
}

impl FallbackClassifier {
    pub fn new(
        primary: Option<Arc<dyn IntentClassifier>>,
        fallback: Arc<dyn IntentClassifier>,
    ) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl IntentClassifier for FallbackClassifier {
    fn name(&self) -> &str {
        self.primary
            .as_ref()
            .map(|p| p.name())
            .unwrap_or_else(|| self.fallback.name())
    }

    async fn classify(&self, raw: &str) -> Result<Intent, PipelineError> {
        if let Some(primary) = &self.primary {
            match primary.classify(raw).await {
                Ok(intent) => return Ok(intent),
                Err(e) => {
                    warn!(
                        classifier = primary.name(),
                        fallback = self.fallback.name(),
                        error = %e,
                        "Primary classifier failed, using fallback"
                    );
                }
            }
        }
        self.fallback.classify(raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::{Purpose, TargetType};

    struct Broken;

    #[async_trait]
    impl IntentClassifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn classify(&self, _raw: &str) -> Result<Intent, PipelineError> {
            Err(PipelineError::Classification("provider down".into()))
        }
    }

    #[tokio::test]
    async fn falls_back_when_primary_fails() {
        let classifier = FallbackClassifier::new(
            Some(Arc::new(Broken)),
            Arc::new(KeywordClassifier::new()),
        );
        let intent = classifier
            .classify("Reach out to 5 hotels in Miami about partnerships")
            .await
            .unwrap();
        assert_eq!(intent.target_type, TargetType::Hotel);
        assert_eq!(intent.purpose, Purpose::Partnership);
        assert_eq!(classifier.name(), "broken");
    }

    #[tokio::test]
    async fn fallback_only() {
        let classifier = FallbackClassifier::new(None, Arc::new(KeywordClassifier::new()));
        assert_eq!(classifier.name(), "keyword");
        assert!(classifier.classify("   ").await.is_err());
    }
}
