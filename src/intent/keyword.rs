//! Deterministic regex classifier.
//!
//! Patterns are evaluated in declaration order and the first match wins for
//! each field. Confidence grows with the number of fields recognized.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::IntentClassifier;
use crate::campaign::model::{clamp_count, Channel, Intent, Purpose, TargetType, Tone};
use crate::error::PipelineError;

/// Count used when the request doesn't name one.
const DEFAULT_COUNT: u32 = 10;

const BASE_CONFIDENCE: f32 = 0.3;
const MAX_CONFIDENCE: f32 = 0.95;

/// Well-known location shorthands.
const LOCATION_ALIASES: &[(&str, &str)] = &[
    ("nyc", "New York, NY"),
    ("new york city", "New York, NY"),
    ("ny", "New York, NY"),
    ("la", "Los Angeles, CA"),
    ("sf", "San Francisco, CA"),
    ("bay area", "San Francisco Bay Area, CA"),
    ("dc", "Washington, DC"),
    ("atx", "Austin, TX"),
    ("chi", "Chicago, IL"),
    ("philly", "Philadelphia, PA"),
    ("vegas", "Las Vegas, NV"),
    ("uk", "United Kingdom"),
];

struct Pattern<T> {
    regex: Regex,
    value: T,
}

fn patterns<T: Copy>(table: &[(&str, T)]) -> Vec<Pattern<T>> {
    table
        .iter()
        .map(|(re, value)| Pattern {
            regex: Regex::new(re).unwrap(),
            value: *value,
        })
        .collect()
}

fn first_match<T: Copy>(patterns: &[Pattern<T>], text: &str) -> Option<T> {
    patterns
        .iter()
        .find(|p| p.regex.is_match(text))
        .map(|p| p.value)
}

pub struct KeywordClassifier {
    count: Regex,
    location: Regex,
    description: Regex,
    niche: Regex,
    target_types: Vec<Pattern<TargetType>>,
    purposes: Vec<Pattern<Purpose>>,
    channels: Vec<Pattern<Channel>>,
    tones: Vec<Pattern<Tone>>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            count: Regex::new(r"\b(\d+)\b").unwrap(),
            location: Regex::new(
                r"(?i)\b(?:in|near|around|based in|located in)\s+([a-z][a-z .,'-]*?)(?:\s+(?:about|for|to|regarding|via|over|on|with|who|that|and)\b|[.!?;]|$)",
            )
            .unwrap(),
            description: Regex::new(r"(?i)\b(?:about|regarding|re:|for)\s+(.+?)[.!?]?\s*$").unwrap(),
            niche: Regex::new(
                r"(?i)\b(vegan|vegetarian|italian|mexican|japanese|sushi|thai|indian|coffee|craft beer|boutique|luxury|budget|fitness|yoga|beauty|skincare|fashion|food|travel|gaming|tech|ai|saas|fintech|crypto|wellness|pet|parenting|outdoor|music)\b",
            )
            .unwrap(),
            target_types: patterns(&[
                (r"(?i)\b(restaurants?|restaurant owners?|cafes?|bistros?|bakeries|bakery|bars?)\b", TargetType::RestaurantOwner),
                (r"(?i)\b(hotels?|resorts?|motels?|inns?|hospitality)\b", TargetType::Hotel),
                (r"(?i)\b(influencers?|instagrammers?|tiktokers?)\b", TargetType::Influencer),
                (r"(?i)\b(creators?|content creators?|youtubers?|streamers?|podcasters?)\b", TargetType::Creator),
                (r"(?i)\b(founders?|startups?|entrepreneurs?|ceos?)\b", TargetType::Founder),
                (r"(?i)\b(executives?|vps?|directors?|cmos?|ctos?)\b", TargetType::Executive),
                (r"(?i)\b(agency|agencies)\b", TargetType::Agency),
                (r"(?i)\b(retailers?|stores?|shops?|boutiques?)\b", TargetType::Retailer),
                (r"(?i)\b(realtors?|real estate agents?|brokers?)\b", TargetType::Realtor),
                (r"(?i)\b(gyms?|fitness studios?|studios?)\b", TargetType::Gym),
                (r"(?i)\b(small business(es)?|local business(es)?|businesses)\b", TargetType::SmallBusiness),
                (r"(?i)\b(investors?|vcs?|venture capitalists?|angels?)\b", TargetType::Investor),
            ]),
            purposes: patterns(&[
                (r"(?i)\b(brand deals?|sponsored posts?|paid promotions?)\b", Purpose::BrandDeal),
                (r"(?i)\b(sponsor|sponsors|sponsorships?|sponsoring)\b", Purpose::Sponsorship),
                (r"(?i)\b(partnerships?|partner|partnering)\b", Purpose::Partnership),
                (r"(?i)\b(collabs?|collaborations?|collaborate)\b", Purpose::Collaboration),
                (r"(?i)\b(hire|hiring|recruit|recruiting|job)\b", Purpose::Hiring),
                (r"(?i)\b(invest|investment|fundraising|funding|raise)\b", Purpose::Investment),
                (r"(?i)\b(sell|sales|demo|pitch|product)\b", Purpose::Sales),
                (r"(?i)\b(network|networking|connect|intro|introductions?)\b", Purpose::Networking),
                (r"(?i)\b(feedback|survey|interviews?|research)\b", Purpose::Feedback),
            ]),
            channels: patterns(&[
                (r"(?i)\b(whats\s?app|sms|text message)\b", Channel::Whatsapp),
                (r"(?i)\b(dms?|direct messages?|instagram|twitter|tiktok|linkedin)\b", Channel::Dm),
                (r"(?i)\b(e-?mails?|cold emails?|inbox)\b", Channel::Email),
            ]),
            tones: patterns(&[
                (r"(?i)\b(casual|relaxed|informal|chill)\b", Tone::Casual),
                (r"(?i)\b(friendly|warm|upbeat)\b", Tone::Friendly),
                (r"(?i)\b(direct|brief|short|concise|to the point)\b", Tone::Direct),
                (r"(?i)\b(professional|formal)\b", Tone::Professional),
            ]),
        }
    }

    fn extract_location(&self, text: &str) -> Option<String> {
        let caps = self.location.captures(text)?;
        let raw = caps.get(1)?.as_str().trim().trim_end_matches(',').trim();
        if raw.is_empty() {
            return None;
        }
        let lower = raw.to_lowercase();
        if let Some((_, expanded)) = LOCATION_ALIASES.iter().find(|(alias, _)| *alias == lower) {
            return Some((*expanded).to_string());
        }
        Some(title_case(raw))
    }

    /// Parse `text` into an intent. Never fails on non-empty input.
    pub fn parse(&self, text: &str) -> Option<Intent> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let mut confidence = BASE_CONFIDENCE;

        let target_type = first_match(&self.target_types, text).unwrap_or(TargetType::Other);
        if target_type != TargetType::Other {
            confidence += 0.25;
        }

        let purpose = first_match(&self.purposes, text).unwrap_or(Purpose::General);
        if purpose != Purpose::General {
            confidence += 0.15;
        }

        let count = match self
            .count
            .captures(text)
            .and_then(|c| c.get(1))
            // Digit-only, so a parse failure can only be overflow.
            .map(|m| m.as_str().parse::<i64>().unwrap_or(i64::MAX))
        {
            Some(n) => {
                confidence += 0.1;
                clamp_count(n)
            }
            None => DEFAULT_COUNT,
        };

        let location = self.extract_location(text);
        if location.is_some() {
            confidence += 0.1;
        }

        let channel = first_match(&self.channels, text).unwrap_or(Channel::Unset);
        if channel != Channel::Unset {
            confidence += 0.05;
        }

        let target_niche = self
            .niche
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase());
        if target_niche.is_some() {
            confidence += 0.05;
        }

        let tone = first_match(&self.tones, text).unwrap_or(Tone::Professional);

        let purpose_description = self
            .description
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| purpose.label().to_string());

        let intent = Intent {
            channel,
            target_type,
            target_niche,
            location,
            purpose,
            purpose_description,
            count,
            tone,
            confidence: confidence.min(MAX_CONFIDENCE),
        };
        debug!(
            target_type = %intent.target_type,
            purpose = %intent.purpose,
            count = intent.count,
            confidence = intent.confidence,
            "Keyword classifier parsed request"
        );
        Some(intent)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, raw: &str) -> Result<Intent, PipelineError> {
        self.parse(raw)
            .ok_or_else(|| PipelineError::Classification("empty request".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Intent {
        KeywordClassifier::new().parse(text).unwrap()
    }

    #[test]
    fn restaurants_in_nyc() {
        let intent = parse("Reach out to 3 restaurants in NYC about partnerships");
        assert_eq!(intent.target_type, TargetType::RestaurantOwner);
        assert_eq!(intent.location.as_deref(), Some("New York, NY"));
        assert_eq!(intent.purpose, Purpose::Partnership);
        assert_eq!(intent.count, 3);
        assert_eq!(intent.channel, Channel::Unset);
        assert_eq!(intent.purpose_description, "partnerships");
        assert!(intent.confidence >= 0.8);
    }

    #[test]
    fn count_is_clamped() {
        assert_eq!(parse("email 500 hotels about sales").count, 100);
        assert_eq!(parse("email 0 hotels about sales").count, 1);
        assert_eq!(parse("email hotels about sales").count, DEFAULT_COUNT);
    }

    #[test]
    fn huge_counts_clamp_to_max() {
        assert_eq!(parse("Reach out to 1000000 hotels").count, 100);
        assert_eq!(parse("Reach out to 12345678901234567890123 hotels").count, 100);
    }

    #[test]
    fn creators_over_instagram() {
        let intent = parse("DM 20 fitness creators on Instagram for a brand deal, keep it casual");
        assert_eq!(intent.target_type, TargetType::Creator);
        assert_eq!(intent.purpose, Purpose::BrandDeal);
        assert_eq!(intent.channel, Channel::Dm);
        assert_eq!(intent.tone, Tone::Casual);
        assert_eq!(intent.target_niche.as_deref(), Some("fitness"));
    }

    #[test]
    fn plain_location_is_title_cased() {
        let intent = parse("find 5 gyms in austin about sponsorship");
        assert_eq!(intent.location.as_deref(), Some("Austin"));
        assert_eq!(intent.purpose, Purpose::Sponsorship);
    }

    #[test]
    fn vague_request_has_low_confidence() {
        let intent = parse("hello there");
        assert_eq!(intent.target_type, TargetType::Other);
        assert_eq!(intent.purpose, Purpose::General);
        assert!(intent.needs_clarification(0.5));
    }

    #[test]
    fn deterministic() {
        let c = KeywordClassifier::new();
        let text = "whatsapp 12 realtors in Lisbon about networking";
        assert_eq!(c.parse(text), c.parse(text));
        assert_eq!(c.parse(text).unwrap().channel, Channel::Whatsapp);
    }

    #[tokio::test]
    async fn empty_input_is_classification_failure() {
        let err = KeywordClassifier::new().classify("").await.unwrap_err();
        assert!(matches!(err, PipelineError::Classification(_)));
    }
}
