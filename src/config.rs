//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Read and parse an environment variable, falling back to `default`.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Campaign pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout applied to each adapter call (classify, discover, per-target generate).
    pub stage_timeout: Duration,
    /// Maximum number of drafts generated concurrently.
    pub generation_concurrency: usize,
    /// Intents below this confidence are rejected as needing clarification.
    pub clarification_threshold: f32,
    /// Reject low-confidence intents instead of proceeding with them.
    pub reject_low_confidence: bool,
    /// Skip the channel selection stage (unset channels resolve to email).
    pub skip_channel_selection: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(30),
            generation_concurrency: 5,
            clarification_threshold: 0.5,
            reject_low_confidence: true,
            skip_channel_selection: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stage_timeout: Duration::from_secs(env_or(
                "OUTREACH_STAGE_TIMEOUT_SECS",
                defaults.stage_timeout.as_secs(),
            )),
            generation_concurrency: env_or(
                "OUTREACH_GENERATION_CONCURRENCY",
                defaults.generation_concurrency,
            )
            .max(1),
            clarification_threshold: env_or(
                "OUTREACH_CLARIFICATION_THRESHOLD",
                defaults.clarification_threshold,
            ),
            reject_low_confidence: env_or(
                "OUTREACH_REJECT_LOW_CONFIDENCE",
                defaults.reject_low_confidence,
            ),
            skip_channel_selection: env_or(
                "OUTREACH_SKIP_CHANNEL_SELECTION",
                defaults.skip_channel_selection,
            ),
        }
    }
}

/// Weights for the advisory quality score.
///
/// These are policy knobs, not derived from a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub base: f32,
    pub company_weight: f32,
    pub niche_weight: f32,
    pub location_weight: f32,
    pub news_weight: f32,
    pub purpose_weight: f32,
    /// Multiplier applied to the original score when rendering a follow-up.
    pub follow_up_decay: f32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            base: 0.5,
            company_weight: 0.15,
            niche_weight: 0.1,
            location_weight: 0.1,
            news_weight: 0.1,
            purpose_weight: 0.05,
            follow_up_decay: 0.9,
        }
    }
}

/// Follow-up scheduler configuration.
#[derive(Debug, Clone)]
pub struct FollowUpConfig {
    /// Whether the recurring ticker runs at all.
    pub enabled: bool,
    /// Cron expression (with seconds) for the ticker.
    pub schedule: String,
    /// Delay used for the default rule attached to new campaigns.
    pub default_delay_hours: u32,
    /// Attempt cap used for the default rule attached to new campaigns.
    pub default_max_attempts: u32,
    /// Max due actions processed per tick.
    pub batch_size: usize,
    /// In-flight actions older than this are failed so they can be retried.
    pub stuck_threshold: Duration,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "0 */5 * * * *".to_string(),
            default_delay_hours: 72,
            default_max_attempts: 3,
            batch_size: 50,
            stuck_threshold: Duration::from_secs(15 * 60),
        }
    }
}

impl FollowUpConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("OUTREACH_FOLLOWUPS_ENABLED", defaults.enabled),
            schedule: std::env::var("OUTREACH_FOLLOWUP_SCHEDULE").unwrap_or(defaults.schedule),
            default_delay_hours: env_or(
                "OUTREACH_FOLLOWUP_DELAY_HOURS",
                defaults.default_delay_hours,
            ),
            default_max_attempts: env_or(
                "OUTREACH_FOLLOWUP_MAX_ATTEMPTS",
                defaults.default_max_attempts,
            ),
            batch_size: env_or("OUTREACH_FOLLOWUP_BATCH_SIZE", defaults.batch_size),
            stuck_threshold: Duration::from_secs(env_or(
                "OUTREACH_FOLLOWUP_STUCK_SECS",
                defaults.stuck_threshold.as_secs(),
            )),
        }
    }
}

/// HTTP server and storage configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Idle time after which a conversation session is swept.
    pub session_ttl: Duration,
    /// Display name used in message sign-offs.
    pub sender_name: String,
    /// Fixture file for the static discovery source.
    pub targets_file: Option<PathBuf>,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/outreach.db"),
            session_ttl: Duration::from_secs(30 * 60),
            sender_name: "The Team".to_string(),
            targets_file: None,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_or("OUTREACH_PORT", defaults.port),
            db_path: std::env::var("OUTREACH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            session_ttl: Duration::from_secs(env_or(
                "OUTREACH_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )),
            sender_name: std::env::var("OUTREACH_SENDER_NAME").unwrap_or(defaults.sender_name),
            targets_file: std::env::var("OUTREACH_TARGETS_FILE").ok().map(PathBuf::from),
            log_dir: std::env::var("OUTREACH_LOG_DIR").ok().map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_policy_defaults() {
        let policy = ScoringPolicy::default();
        assert!((policy.base - 0.5).abs() < f32::EPSILON);
        assert!((policy.follow_up_decay - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn followup_default_schedule_parses() {
        use std::str::FromStr;
        let config = FollowUpConfig::default();
        assert!(cron::Schedule::from_str(&config.schedule).is_ok());
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        // Unset key
        let v: u16 = env_or("OUTREACH_TEST_SURELY_UNSET_KEY", 42);
        assert_eq!(v, 42);
    }
}
