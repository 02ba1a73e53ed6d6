//! Rule-based channel selection.
//!
//! An explicit channel on the intent always wins. Otherwise every rule
//! contributes zero or more candidates; candidates are stably sorted by
//! confidence so ties keep rule order, and the best one is chosen.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::campaign::model::{Channel, Intent, Purpose, TargetType};

/// Alternatives at or below this confidence are not worth offering.
const ALTERNATIVE_FLOOR: f32 = 0.3;

/// Locations where WhatsApp is the everyday business channel.
const WHATSAPP_MARKETS: &[&str] = &[
    "brazil", "sao paulo", "são paulo", "rio de janeiro", "mexico", "méxico", "india",
    "mumbai", "delhi", "bangalore", "bengaluru", "spain", "madrid", "barcelona", "argentina",
    "buenos aires", "colombia", "bogota", "bogotá", "nigeria", "lagos", "kenya", "nairobi",
    "indonesia", "jakarta", "south africa", "cape town", "johannesburg", "italy", "milan",
    "rome", "portugal", "lisbon", "turkey", "istanbul", "dubai", "uae",
];

/// Place names that contain a market name but are not in that market.
const MARKET_LOOKALIKES: &[&str] = &["new mexico"];

fn place_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn find_phrase(haystack: &[String], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() {
        return None;
    }
    haystack.windows(phrase.len()).position(|w| w == phrase)
}

/// Whole-word market match, so "Indiana" is not "India".
fn in_whatsapp_market(location: &str) -> bool {
    let mut tokens = place_tokens(location);
    for lookalike in MARKET_LOOKALIKES {
        let phrase = place_tokens(lookalike);
        while let Some(at) = find_phrase(&tokens, &phrase) {
            tokens.drain(at..at + phrase.len());
        }
    }
    WHATSAPP_MARKETS
        .iter()
        .any(|market| find_phrase(&tokens, &place_tokens(market)).is_some())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCandidate {
    pub channel: Channel,
    pub confidence: f32,
    pub rationale: String,
}

impl ChannelCandidate {
    fn new(channel: Channel, confidence: f32, rationale: &str) -> Self {
        Self {
            channel,
            confidence,
            rationale: rationale.to_string(),
        }
    }
}

/// The chosen channel plus ranked runners-up on other channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDecision {
    pub channel: Channel,
    pub confidence: f32,
    pub rationale: String,
    pub alternatives: Vec<ChannelCandidate>,
}

type Rule = fn(&Intent) -> Vec<ChannelCandidate>;

fn target_type_rule(intent: &Intent) -> Vec<ChannelCandidate> {
    let t = intent.target_type;
    if t.is_social() {
        vec![
            ChannelCandidate::new(Channel::Dm, 0.85, "creators and influencers answer DMs"),
            ChannelCandidate::new(Channel::Email, 0.5, "most creators list a business email"),
        ]
    } else if t == TargetType::Investor {
        vec![ChannelCandidate::new(Channel::Email, 0.8, "investors expect a concise email")]
    } else if t.is_business() {
        vec![ChannelCandidate::new(Channel::Email, 0.8, "business contacts expect email")]
    } else {
        Vec::new()
    }
}

fn purpose_rule(intent: &Intent) -> Vec<ChannelCandidate> {
    match intent.purpose {
        Purpose::BrandDeal | Purpose::Collaboration | Purpose::Sponsorship => vec![
            ChannelCandidate::new(Channel::Dm, 0.75, "creator deals start in DMs"),
        ],
        Purpose::Sales | Purpose::Partnership | Purpose::Investment | Purpose::Hiring => vec![
            ChannelCandidate::new(Channel::Email, 0.75, "formal proposals belong in email"),
        ],
        Purpose::Networking => vec![
            ChannelCandidate::new(Channel::Dm, 0.6, "networking works well over DM"),
        ],
        Purpose::Feedback | Purpose::General => Vec::new(),
    }
}

fn location_rule(intent: &Intent) -> Vec<ChannelCandidate> {
    let Some(location) = intent.location.as_deref() else {
        return Vec::new();
    };
    if in_whatsapp_market(location) {
        vec![ChannelCandidate::new(
            Channel::Whatsapp,
            0.65,
            "WhatsApp is the default business channel in this market",
        )]
    } else {
        Vec::new()
    }
}

pub struct ChannelSelector {
    rules: Vec<Rule>,
    default: ChannelCandidate,
}

impl ChannelSelector {
    pub fn new() -> Self {
        Self {
            rules: vec![target_type_rule, purpose_rule, location_rule],
            default: ChannelCandidate::new(Channel::Email, 0.7, "default"),
        }
    }

    /// Choose a channel for `intent`.
    pub fn select(&self, intent: &Intent) -> ChannelDecision {
        if intent.channel != Channel::Unset {
            return ChannelDecision {
                channel: intent.channel,
                confidence: 1.0,
                rationale: "explicit".to_string(),
                alternatives: Vec::new(),
            };
        }

        let mut candidates: Vec<ChannelCandidate> =
            self.rules.iter().flat_map(|rule| rule(intent)).collect();
        if candidates.is_empty() {
            candidates.push(self.default.clone());
        }
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut ranked = candidates.into_iter();
        let Some(best) = ranked.next() else {
            return ChannelDecision {
                channel: self.default.channel,
                confidence: self.default.confidence,
                rationale: self.default.rationale.clone(),
                alternatives: Vec::new(),
            };
        };

        let mut alternatives: Vec<ChannelCandidate> = Vec::new();
        for candidate in ranked {
            if candidate.channel == best.channel
                || candidate.confidence <= ALTERNATIVE_FLOOR
                || alternatives.iter().any(|a| a.channel == candidate.channel)
            {
                continue;
            }
            alternatives.push(candidate);
        }

        debug!(
            channel = %best.channel,
            confidence = best.confidence,
            rationale = %best.rationale,
            alternatives = alternatives.len(),
            "Channel selected"
        );

        ChannelDecision {
            channel: best.channel,
            confidence: best.confidence,
            rationale: best.rationale,
            alternatives,
        }
    }
}

impl Default for ChannelSelector {
    fn default() -> Self {
        Self::new()
    }
}
