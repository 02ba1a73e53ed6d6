//! `LlmProvider` over any rig completion model.

use async_trait::async_trait;
use rig::completion::{CompletionError, CompletionModel};
use rig::message::{AssistantContent, Message};
use rust_decimal::Decimal;

use super::costs::model_cost;
use super::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role};
use super::retry::{RetryPolicy, with_retry};
use crate::error::LlmError;

const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    retry: RetryPolicy,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// A request reshaped for rig: system text becomes the preamble, the last
/// turn is the prompt and everything before it is chat history.
#[derive(Debug)]
struct RigPrompt {
    preamble: Option<String>,
    prompt: Message,
    history: Vec<Message>,
}

fn to_rig(request: &CompletionRequest) -> Result<RigPrompt, LlmError> {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut turns: Vec<Message> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content.clone()),
            _ => Message::user(m.content.clone()),
        })
        .collect();

    let prompt = turns.pop().ok_or_else(|| LlmError::InvalidResponse {
        provider: "rig".to_string(),
        reason: "completion request has no user or assistant turn".to_string(),
    })?;

    Ok(RigPrompt {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        prompt,
        history: turns,
    })
}

fn response_text<'a>(choice: impl IntoIterator<Item = &'a AssistantContent>) -> String {
    choice
        .into_iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect()
}

fn map_error(model: &str, err: CompletionError) -> LlmError {
    match err {
        CompletionError::JsonError(e) => LlmError::Json(e),
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: model.to_string(),
            reason,
        },
        CompletionError::ProviderError(reason) if reason.contains("authentication_error") => {
            LlmError::AuthFailed {
                provider: model.to_string(),
            }
        }
        CompletionError::ProviderError(reason)
            if reason.contains("429") || reason.to_ascii_lowercase().contains("rate_limit") =>
        {
            LlmError::RateLimited {
                provider: model.to_string(),
                retry_after: None,
            }
        }
        other => LlmError::RequestFailed {
            provider: model.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        model_cost(&self.model_name)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let rig_prompt = to_rig(&request)?;
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let response = with_retry(self.retry, || {
            let mut builder = self
                .model
                .completion_request(rig_prompt.prompt.clone())
                .messages(rig_prompt.history.clone())
                .max_tokens(u64::from(max_tokens));
            if let Some(preamble) = &rig_prompt.preamble {
                builder = builder.preamble(preamble.clone());
            }
            if let Some(temperature) = request.temperature {
                builder = builder.temperature(f64::from(temperature));
            }
            let model_name = self.model_name.as_str();
            async move { builder.send().await.map_err(|e| map_error(model_name, e)) }
        })
        .await?;

        let content = response_text(response.choice.iter());
        let completion = CompletionResponse {
            finish_reason: if content.is_empty() {
                FinishReason::Other
            } else {
                FinishReason::Stop
            },
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            response_id: None,
        };
        tracing::debug!(
            model = %self.model_name,
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            cost = %self.cost_of(&completion),
            "LLM call complete"
        );
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ChatMessage;

    #[test]
    fn system_turns_become_preamble() {
        let req = CompletionRequest::new(vec![
            ChatMessage::system("be terse"),
            ChatMessage::system("reply in JSON"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
            ChatMessage::user("classify this"),
        ]);
        let rig_prompt = to_rig(&req).unwrap();
        assert_eq!(rig_prompt.preamble.as_deref(), Some("be terse\n\nreply in JSON"));
        assert_eq!(rig_prompt.history.len(), 2);
        assert_eq!(rig_prompt.prompt, Message::user("classify this"));
        assert_eq!(rig_prompt.history[1], Message::assistant("hi"));
    }

    #[test]
    fn no_preamble_without_system_turns() {
        let rig_prompt = to_rig(&CompletionRequest::new(vec![ChatMessage::user("hi")])).unwrap();
        assert!(rig_prompt.preamble.is_none());
        assert!(rig_prompt.history.is_empty());
    }

    #[test]
    fn system_only_request_is_rejected() {
        let err = to_rig(&CompletionRequest::new(vec![ChatMessage::system("s")])).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn text_blocks_are_joined() {
        let choice = vec![AssistantContent::text("{\"a\":"), AssistantContent::text("1}")];
        assert_eq!(response_text(choice.iter()), "{\"a\":1}");
    }

    #[test]
    fn provider_errors_are_classified() {
        let limited = map_error("m", CompletionError::ProviderError("HTTP 429 rate_limit_error".into()));
        assert!(matches!(limited, LlmError::RateLimited { .. }));

        let bad = map_error("m", CompletionError::ResponseError("no content".into()));
        assert!(matches!(bad, LlmError::InvalidResponse { .. }));

        let auth = map_error("m", CompletionError::ProviderError("authentication_error: invalid x-api-key".into()));
        assert!(matches!(auth, LlmError::AuthFailed { .. }));

        let other = map_error("m", CompletionError::ProviderError("overloaded".into()));
        assert!(matches!(other, LlmError::RequestFailed { .. }));
    }
}
