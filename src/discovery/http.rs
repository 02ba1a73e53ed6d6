//! Target source backed by an external HTTP search service.
//!
//! Issues `GET {url}?target_type=..&location=..&niche=..&purpose=..&count=..`
//! and accepts either a bare JSON array or `{"results": [...]}`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{RawTarget, TargetQuery, TargetSource};
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub url: String,
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

impl HttpSourceConfig {
    /// Reads `OUTREACH_DISCOVERY_URL`; `None` when unset.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("OUTREACH_DISCOVERY_URL").ok()?;
        let token = std::env::var("OUTREACH_DISCOVERY_TOKEN")
            .ok()
            .map(SecretString::from);
        let timeout_secs: u64 = std::env::var("OUTREACH_DISCOVERY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);
        Some(Self {
            url,
            token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Bare(Vec<RawTarget>),
    Wrapped { results: Vec<RawTarget> },
}

impl SearchResponse {
    fn into_records(self) -> Vec<RawTarget> {
        match self {
            Self::Bare(records) | Self::Wrapped { results: records } => records,
        }
    }
}

pub struct HttpSource {
    config: HttpSourceConfig,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn params(query: &TargetQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("target_type", query.target_type.to_string()),
            ("purpose", query.purpose.to_string()),
            ("count", query.count.to_string()),
        ];
        if let Some(location) = &query.location {
            params.push(("location", location.clone()));
        }
        if let Some(niche) = &query.niche {
            params.push(("niche", niche.clone()));
        }
        params
    }
}

#[async_trait]
impl TargetSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, query: &TargetQuery) -> Result<Vec<RawTarget>, PipelineError> {
        let mut request = self
            .client
            .get(&self.config.url)
            .timeout(self.config.timeout)
            .query(&Self::params(query));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Discovery(format!("search request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Discovery(format!(
                "search service returned {status}"
            )));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Discovery(format!("invalid search response: {e}")))?;
        Ok(parsed.into_records())
    }
}
