//! LLM-polished drafts.
//!
//! Renders the template draft first, then asks the model to rewrite the
//! copy for the target. Personalization flags, quality and template id come
//! from the template pass; only subject and body are replaced.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{DraftWriter, GenerationContext, MessageGenerator};
use crate::campaign::model::{Intent, MessageDraft, Target};
use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::parse_json_reply;

const WRITE_MAX_TOKENS: u32 = 700;
const WRITE_TEMPERATURE: f32 = 0.4;

pub struct LlmDraftWriter {
    llm: Arc<dyn LlmProvider>,
    templates: Arc<MessageGenerator>,
}

impl LlmDraftWriter {
    pub fn new(llm: Arc<dyn LlmProvider>, templates: Arc<MessageGenerator>) -> Self {
        Self { llm, templates }
    }
}

#[derive(Debug, Deserialize)]
struct RewriteResponse {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: String,
}

fn build_write_system_prompt() -> String {
    "You polish cold outreach messages.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"subject\": \"...\", \"body\": \"...\"}\n\n\
     Rules:\n\
     - Keep every fact from the draft; never invent names, numbers, or events\n\
     - Keep the greeting and sign-off lines\n\
     - Match the requested tone\n\
     - Under 120 words for email, under 60 words for dm and whatsapp\n\
     - Omit subject for dm and whatsapp"
        .to_string()
}

fn build_write_user_prompt(intent: &Intent, target: &Target, draft: &MessageDraft) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(&format!("Channel: {}\n", draft.channel));
    prompt.push_str(&format!("Tone: {}\n", draft.tone));
    prompt.push_str(&format!("Purpose: {}\n", intent.purpose.label()));
    prompt.push_str(&format!("Recipient: {}", target.name));
    if let Some(title) = &target.title {
        prompt.push_str(&format!(", {title}"));
    }
    if let Some(company) = &target.company {
        prompt.push_str(&format!(" at {company}"));
    }
    prompt.push('\n');
    if !draft.personalization.hooks.is_empty() {
        prompt.push_str(&format!(
            "Personalization: {}\n",
            draft.personalization.hooks.join("; ")
        ));
    }
    prompt.push_str("\nDraft:\n");
    if let Some(subject) = &draft.subject {
        prompt.push_str(&format!("Subject: {subject}\n"));
    }
    prompt.push_str(&draft.body);
    prompt
}

fn parse_rewrite_response(text: &str) -> Result<RewriteResponse, String> {
    let parsed: RewriteResponse =
        parse_json_reply(text).map_err(|e| format!("invalid JSON: {e}"))?;
    if parsed.body.trim().is_empty() {
        return Err("empty body".into());
    }
    Ok(parsed)
}

#[async_trait]
impl DraftWriter for LlmDraftWriter {
    fn name(&self) -> &str {
        "llm"
    }

    async fn write(
        &self,
        intent: &Intent,
        target: &Target,
        context: Option<&GenerationContext>,
    ) -> Result<MessageDraft, PipelineError> {
        let mut draft = self.templates.generate(intent, target, context);

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_write_system_prompt()),
            ChatMessage::user(build_write_user_prompt(intent, target, &draft)),
        ])
        .with_temperature(WRITE_TEMPERATURE)
        .with_max_tokens(WRITE_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let rewrite = parse_rewrite_response(&response.content)
            .map_err(|e| PipelineError::Generation(format!("rewrite parse failed: {e}")))?;

        draft.body = rewrite.body.trim().to_string();
        if draft.channel.supports_subject()
            && let Some(subject) = rewrite.subject.filter(|s| !s.trim().is_empty())
        {
            draft.subject = Some(subject.trim().to_string());
        }
        debug!(
            target_id = %target.id,
            template = %draft.template_id,
            "LLM polished draft"
        );
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::{Channel, Purpose, TargetType};
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    struct MockWriterLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockWriterLlm {
        fn model_name(&self) -> &str {
            "mock-writer"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 300,
                output_tokens: 120,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn writer(response: &str) -> LlmDraftWriter {
        LlmDraftWriter::new(
            Arc::new(MockWriterLlm {
                response: response.to_string(),
            }),
            Arc::new(MessageGenerator::default()),
        )
    }

    fn intent(channel: Channel) -> Intent {
        Intent::new(TargetType::Hotel, Purpose::Partnership).with_channel(channel)
    }

    #[test]
    fn user_prompt_carries_draft_and_recipient() {
        let target = Target::new("Ana Ruiz").with_company("Hotel Sol").with_title("GM");
        let i = intent(Channel::Email);
        let draft = MessageGenerator::default().generate(&i, &target, None);
        let prompt = build_write_user_prompt(&i, &target, &draft);
        assert!(prompt.contains("Ana Ruiz, GM at Hotel Sol"));
        assert!(prompt.contains("Subject:"));
        assert!(prompt.contains("company: Hotel Sol"));
    }

    #[tokio::test]
    async fn replaces_subject_and_body() {
        let w = writer(r#"{"subject": "Hotel Sol x us", "body": "Hi Ana,\n\nShort and sweet."}"#);
        let target = Target::new("Ana").with_company("Hotel Sol");
        let draft = w.write(&intent(Channel::Email), &target, None).await.unwrap();
        assert_eq!(draft.subject.as_deref(), Some("Hotel Sol x us"));
        assert_eq!(draft.body, "Hi Ana,\n\nShort and sweet.");
        assert_eq!(draft.template_id, "hotel.partnership");
    }

    #[tokio::test]
    async fn dm_ignores_subject() {
        let w = writer(r#"{"subject": "ignored", "body": "Hey Ana!"}"#);
        let draft = w
            .write(&intent(Channel::Dm), &Target::new("Ana").with_company("Sol"), None)
            .await
            .unwrap();
        assert!(draft.subject.is_none());
    }

    #[tokio::test]
    async fn empty_body_is_generation_error() {
        let w = writer(r#"{"subject": "x", "body": "  "}"#);
        let err = w
            .write(&intent(Channel::Email), &Target::new("Ana").with_company("Sol"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }
}
