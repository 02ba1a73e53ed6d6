//! LLM-backed intent classifier.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::IntentClassifier;
use crate::campaign::model::{clamp_count, Channel, Intent, Purpose, TargetType, Tone};
use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::parse_json_reply;

const CLASSIFY_MAX_TOKENS: u32 = 400;
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Longest request text forwarded to the model.
const MAX_INPUT_CHARS: usize = 2000;

pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, raw: &str) -> Result<Intent, PipelineError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PipelineError::Classification("empty request".into()));
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(truncate(raw, MAX_INPUT_CHARS)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;

        let intent = parse_intent_response(&response.content).map_err(|e| {
            warn!(
                model = self.llm.model_name(),
                raw_response = %response.content,
                error = %e,
                "Failed to parse intent response"
            );
            PipelineError::Classification(format!("parse failed: {e}"))
        })?;

        debug!(
            target_type = %intent.target_type,
            purpose = %intent.purpose,
            channel = %intent.channel,
            confidence = intent.confidence,
            "LLM classified request"
        );
        Ok(intent)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn build_classify_system_prompt() -> String {
    let types = TargetType::ALL
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let purposes = Purpose::ALL
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You turn outreach requests into structured campaign intents.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"channel\": \"...\", \"target_type\": \"...\", \"target_niche\": \"...\", \"location\": \"...\", \
         \"purpose\": \"...\", \"purpose_description\": \"...\", \"count\": 10, \"tone\": \"...\", \"confidence\": 0.0}}\n\n\
         Fields:\n\
         - channel: email, dm, whatsapp, or unset when the request doesn't say\n\
         - target_type: one of {types}\n\
         - purpose: one of {purposes}\n\
         - count: how many people to contact (1-100, default 10)\n\
         - tone: professional, casual, direct, or friendly\n\
         - confidence: 0.0-1.0, how sure you are the request was understood\n\n\
         Rules:\n\
         - Omit target_niche and location when not mentioned\n\
         - Expand city abbreviations (NYC -> New York, NY)\n\
         - Use low confidence (<0.5) for vague requests"
    )
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

/// Coerce a count that may arrive as a number or a numeric string.
fn count_field(value: &Value) -> Option<i64> {
    match value.get("count")? {
        Value::Number(n) => n.as_f64().map(|f| f.round() as i64),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

/// Parse the model's JSON into an intent.
///
/// Lenient on everything except `target_type`: unknown enum values fall back
/// to their defaults, counts are clamped, confidence is clamped to [0, 1].
pub(crate) fn parse_intent_response(text: &str) -> Result<Intent, String> {
    let object: serde_json::Map<String, Value> =
        parse_json_reply(text).map_err(|e| format!("expected a JSON object: {e}"))?;
    let value = Value::Object(object);

    let target_type = string_field(&value, "target_type")
        .map(|s| TargetType::parse_lenient(&s))
        .ok_or("missing target_type")?;
    let purpose = string_field(&value, "purpose")
        .map(|s| Purpose::parse_lenient(&s))
        .unwrap_or_default();
    let channel = string_field(&value, "channel")
        .map(|s| Channel::parse_lenient(&s))
        .unwrap_or_default();
    let tone = string_field(&value, "tone")
        .map(|s| Tone::parse_lenient(&s))
        .unwrap_or_default();
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    Ok(Intent {
        channel,
        target_type,
        target_niche: string_field(&value, "target_niche"),
        location: string_field(&value, "location"),
        purpose,
        purpose_description: string_field(&value, "purpose_description")
            .unwrap_or_else(|| purpose.label().to_string()),
        count: count_field(&value).map(clamp_count).unwrap_or(10),
        tone,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    struct MockIntentLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockIntentLlm {
        fn model_name(&self) -> &str {
            "mock-intent"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 80,
                output_tokens: 40,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn classifier(response: &str) -> LlmIntentClassifier {
        LlmIntentClassifier::new(Arc::new(MockIntentLlm {
            response: response.to_string(),
        }))
    }

    #[test]
    fn system_prompt_lists_vocabularies() {
        let prompt = build_classify_system_prompt();
        assert!(prompt.contains("restaurant_owner"));
        assert!(prompt.contains("brand_deal"));
        assert!(prompt.contains("whatsapp"));
    }

    #[test]
    fn parses_full_response() {
        let intent = parse_intent_response(
            r#"{"channel":"email","target_type":"hotel","location":"Miami, FL","purpose":"partnership",
                "purpose_description":"co-marketing","count":5,"tone":"friendly","confidence":0.92}"#,
        )
        .unwrap();
        assert_eq!(intent.channel, Channel::Email);
        assert_eq!(intent.target_type, TargetType::Hotel);
        assert_eq!(intent.location.as_deref(), Some("Miami, FL"));
        assert_eq!(intent.count, 5);
        assert_eq!(intent.tone, Tone::Friendly);
        assert!((intent.confidence - 0.92).abs() < 1e-6);
    }

    #[test]
    fn coerces_out_of_vocabulary_values() {
        let intent = parse_intent_response(
            r#"{"channel":"carrier pigeon","target_type":"astronauts","purpose":"world peace",
                "count":"250","tone":"sarcastic","confidence":7}"#,
        )
        .unwrap();
        assert_eq!(intent.channel, Channel::Unset);
        assert_eq!(intent.target_type, TargetType::Other);
        assert_eq!(intent.purpose, Purpose::General);
        assert_eq!(intent.count, 100);
        assert_eq!(intent.tone, Tone::Professional);
        assert_eq!(intent.confidence, 1.0);
    }

    #[test]
    fn missing_target_type_is_error() {
        assert!(parse_intent_response(r#"{"purpose":"sales"}"#).is_err());
        assert!(parse_intent_response("not json at all").is_err());
    }

    #[tokio::test]
    async fn classify_handles_markdown_wrapping() {
        let c = classifier("```json\n{\"target_type\":\"creators\",\"purpose\":\"brand deal\",\"count\":20}\n```");
        let intent = c.classify("DM 20 creators about a brand deal").await.unwrap();
        assert_eq!(intent.target_type, TargetType::Creator);
        assert_eq!(intent.purpose, Purpose::BrandDeal);
        assert_eq!(intent.count, 20);
        assert_eq!(intent.confidence, DEFAULT_CONFIDENCE);
    }

    #[tokio::test]
    async fn unparseable_response_is_classification_failure() {
        let err = classifier("I'm not sure").classify("something").await.unwrap_err();
        assert!(matches!(err, PipelineError::Classification(_)));
    }
}
