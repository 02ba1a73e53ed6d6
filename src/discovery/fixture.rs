//! Target source backed by a static JSON list.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::{RawTarget, TargetQuery, TargetSource};
use crate::campaign::model::TargetType;
use crate::error::{ConfigError, PipelineError};

/// Serves records from a fixed list, filtered by type, location and niche.
///
/// Records that omit a field are treated as matching any query on it.
pub struct StaticSource {
    records: Vec<RawTarget>,
}

impl StaticSource {
    pub fn new(records: Vec<RawTarget>) -> Self {
        Self { records }
    }

    /// Load a JSON array of records from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<RawTarget> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
                key: path.display().to_string(),
                message: e.to_string(),
            })?;
        info!(path = %path.display(), records = records.len(), "Loaded target fixture");
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// City part of "City, Region" in lower case.
fn city(location: &str) -> String {
    location
        .split(',')
        .next()
        .unwrap_or(location)
        .trim()
        .to_lowercase()
}

fn location_matches(query: Option<&str>, record: Option<&str>) -> bool {
    match (query, record) {
        (Some(q), Some(r)) => {
            let (q, r) = (city(q), r.to_lowercase());
            r.contains(&q) || q.contains(&city(&r))
        }
        _ => true,
    }
}

fn matches(query: &TargetQuery, record: &RawTarget) -> bool {
    let type_ok = record
        .target_type
        .as_deref()
        .map(|t| query.target_type == TargetType::Other || TargetType::parse_lenient(t) == query.target_type)
        .unwrap_or(true);
    let niche_ok = match (query.niche.as_deref(), record.niche.as_deref()) {
        (Some(q), Some(r)) => r.to_lowercase().contains(&q.to_lowercase()),
        _ => true,
    };
    type_ok && niche_ok && location_matches(query.location.as_deref(), record.location.as_deref())
}

#[async_trait]
impl TargetSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(&self, query: &TargetQuery) -> Result<Vec<RawTarget>, PipelineError> {
        Ok(self
            .records
            .iter()
            .filter(|r| matches(query, r))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::{Intent, Purpose};
    use std::io::Write;

    fn record(name: &str, kind: &str, location: &str) -> RawTarget {
        RawTarget {
            name: Some(name.into()),
            company: Some(format!("{name} Co")),
            target_type: Some(kind.into()),
            location: Some(location.into()),
            ..RawTarget::default()
        }
    }

    fn source() -> StaticSource {
        StaticSource::new(vec![
            record("Lou", "restaurant_owner", "New York, NY"),
            record("Mae", "restaurants", "Brooklyn, New York"),
            record("Sal", "hotel", "New York, NY"),
            record("Ida", "restaurant_owner", "Chicago, IL"),
        ])
    }

    #[tokio::test]
    async fn filters_by_type_and_city() {
        let intent = Intent::new(TargetType::RestaurantOwner, Purpose::Partnership)
            .with_location("New York, NY");
        let found = source().search(&TargetQuery::from_intent(&intent)).await.unwrap();
        let names: Vec<_> = found.iter().filter_map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec!["Lou", "Mae"]);
    }

    #[tokio::test]
    async fn no_location_matches_all_of_type() {
        let intent = Intent::new(TargetType::RestaurantOwner, Purpose::Sales);
        let found = source().search(&TargetQuery::from_intent(&intent)).await.unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn loads_fixture_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name":"Ana","company":"Casa","target_type":"hotel"}},{{"name":"Bo","email":"bo@x.io"}}]"#
        )
        .unwrap();
        let source = StaticSource::from_file(file.path()).unwrap();
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn bad_fixture_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StaticSource::from_file(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
