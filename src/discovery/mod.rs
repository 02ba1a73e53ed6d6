//! Target discovery.
//!
//! A `TargetSource` is the external capability (fixture file, search
//! service) that returns raw candidate records. `DiscoveryAdapter` turns
//! those into campaign-owned `Target`s: it validates, deduplicates,
//! ranks, truncates to the requested count, and assigns ids.

pub mod fixture;
pub mod http;

pub use fixture::StaticSource;
pub use http::{HttpSource, HttpSourceConfig};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::campaign::model::{Intent, Purpose, Target, TargetType};
use crate::error::PipelineError;

/// What to look for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetQuery {
    pub target_type: TargetType,
    pub location: Option<String>,
    pub niche: Option<String>,
    pub purpose: Purpose,
    pub count: u32,
}

impl TargetQuery {
    pub fn from_intent(intent: &Intent) -> Self {
        Self {
            target_type: intent.target_type,
            location: intent.location.clone(),
            niche: intent.target_niche.clone(),
            purpose: intent.purpose,
            count: intent.count,
        }
    }
}

/// Candidate record as returned by a source, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default, alias = "email", alias = "handle", alias = "contact")]
    pub contact_handle: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "score", alias = "relevance")]
    pub relevance_score: Option<f32>,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub niche: Option<String>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl RawTarget {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A usable target has a name plus a company or a contact handle.
    pub fn is_valid(&self) -> bool {
        non_empty(&self.name).is_some()
            && (non_empty(&self.company).is_some() || non_empty(&self.contact_handle).is_some())
    }

    fn dedupe_key(&self) -> String {
        match non_empty(&self.contact_handle) {
            Some(handle) => format!("h:{}", handle.to_lowercase()),
            None => format!(
                "n:{}|{}",
                non_empty(&self.name).unwrap_or_default().to_lowercase(),
                non_empty(&self.company).unwrap_or_default().to_lowercase()
            ),
        }
    }

    fn into_target(self) -> Option<Target> {
        let name = non_empty(&self.name)?.to_string();
        let mut target = Target::new(name).with_relevance(self.relevance_score.unwrap_or(0.5));
        if let Some(title) = non_empty(&self.title) {
            target = target.with_title(title);
        }
        if let Some(company) = non_empty(&self.company) {
            target = target.with_company(company);
        }
        if let Some(handle) = non_empty(&self.contact_handle) {
            target = target.with_contact(handle);
        }
        if let Some(location) = non_empty(&self.location) {
            target = target.with_location(location);
        }
        target.discovered_at = Utc::now();
        Some(target)
    }
}

/// External search capability.
#[async_trait]
pub trait TargetSource: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &TargetQuery) -> Result<Vec<RawTarget>, PipelineError>;
}

/// Validated discovery result. An empty `targets` is a normal outcome.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub targets: Vec<Target>,
    /// Records dropped for failing validation or as duplicates.
    pub dropped: usize,
}

#[async_trait]
pub trait TargetDiscovery: Send + Sync {
    async fn discover(&self, query: &TargetQuery) -> Result<DiscoveryOutcome, PipelineError>;
}

pub struct DiscoveryAdapter {
    source: Arc<dyn TargetSource>,
}

impl DiscoveryAdapter {
    pub fn new(source: Arc<dyn TargetSource>) -> Self {
        Self { source }
    }
}

/// Validate, dedupe, rank by relevance (stable), and cap at `count`.
pub fn refine(raw: Vec<RawTarget>, count: u32) -> DiscoveryOutcome {
    let total = raw.len();
    let mut seen = HashSet::new();
    let mut kept: Vec<RawTarget> = raw
        .into_iter()
        .filter(RawTarget::is_valid)
        .filter(|r| seen.insert(r.dedupe_key()))
        .collect();
    let dropped = total - kept.len();

    kept.sort_by(|a, b| {
        b.relevance_score
            .unwrap_or(0.5)
            .total_cmp(&a.relevance_score.unwrap_or(0.5))
    });
    kept.truncate(count as usize);

    DiscoveryOutcome {
        targets: kept.into_iter().filter_map(RawTarget::into_target).collect(),
        dropped,
    }
}

#[async_trait]
impl TargetDiscovery for DiscoveryAdapter {
    async fn discover(&self, query: &TargetQuery) -> Result<DiscoveryOutcome, PipelineError> {
        debug!(
            source = self.source.name(),
            target_type = %query.target_type,
            location = query.location.as_deref().unwrap_or("any"),
            count = query.count,
            "Searching for targets"
        );
        let raw = self.source.search(query).await?;
        let outcome = refine(raw, query.count);
        info!(
            source = self.source.name(),
            found = outcome.targets.len(),
            dropped = outcome.dropped,
            "Discovery complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::DataQuality;

    fn raw(name: &str, company: Option<&str>, handle: Option<&str>, score: f32) -> RawTarget {
        RawTarget {
            name: Some(name.into()),
            company: company.map(Into::into),
            contact_handle: handle.map(Into::into),
            relevance_score: Some(score),
            ..RawTarget::default()
        }
    }

    #[test]
    fn invalid_records_are_dropped_and_counted() {
        let outcome = refine(
            vec![
                raw("Ana", Some("Casa Ana"), None, 0.9),
                raw("", Some("Nameless"), Some("x@y.com"), 0.9),
                raw("Bo", None, None, 0.9),
            ],
            10,
        );
        assert_eq!(outcome.targets.len(), 1);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(outcome.targets[0].data_quality, DataQuality::Low);
    }

    #[test]
    fn duplicates_by_handle_are_collapsed() {
        let outcome = refine(
            vec![
                raw("Ana Ruiz", Some("Casa Ana"), Some("ana@casa.com"), 0.8),
                raw("Ana R.", None, Some("ANA@casa.com"), 0.7),
                raw("Ana Ruiz", Some("Casa Ana"), None, 0.6),
                raw("ana ruiz", Some("casa ana"), None, 0.5),
            ],
            10,
        );
        assert_eq!(outcome.targets.len(), 2);
        assert_eq!(outcome.dropped, 2);
    }

    #[test]
    fn ranked_and_truncated() {
        let outcome = refine(
            vec![
                raw("Low", Some("A"), None, 0.2),
                raw("High", Some("B"), None, 0.9),
                raw("Mid", Some("C"), None, 0.5),
            ],
            2,
        );
        let names: Vec<_> = outcome.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["High", "Mid"]);
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn ids_are_unique() {
        let outcome = refine(
            vec![raw("A", Some("A"), None, 0.5), raw("B", Some("B"), None, 0.5)],
            10,
        );
        assert_ne!(outcome.targets[0].id, outcome.targets[1].id);
    }

    #[test]
    fn raw_target_accepts_aliases() {
        let parsed: RawTarget =
            serde_json::from_str(r#"{"name":"Kim","email":"kim@x.io","score":0.7}"#).unwrap();
        assert_eq!(parsed.contact_handle.as_deref(), Some("kim@x.io"));
        assert_eq!(parsed.relevance_score, Some(0.7));
    }

    #[tokio::test]
    async fn adapter_returns_empty_outcome_not_error() {
        let adapter = DiscoveryAdapter::new(Arc::new(StaticSource::new(Vec::new())));
        let query = TargetQuery::from_intent(&Intent::new(TargetType::Hotel, Purpose::Sales));
        let outcome = adapter.discover(&query).await.unwrap();
        assert!(outcome.targets.is_empty());
    }
}
