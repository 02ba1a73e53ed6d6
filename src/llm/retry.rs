//! Retry with exponential backoff and jitter for transient provider errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::LlmError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), with up to 25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64 / 4).max(1));
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Rate limits and transport failures are worth another try; bad responses are not.
pub(crate) fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::RequestFailed { .. }
    )
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub(crate) async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = match &e {
                    LlmError::RateLimited {
                        retry_after: Some(after),
                        ..
                    } => (*after).min(policy.max_delay),
                    _ => policy.delay_for(attempt),
                };
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "Retrying LLM call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
