//! DM and WhatsApp delivery through an HTTP relay.
//!
//! The relay receives a JSON payload per message and answers with
//! `{"id": "..."}`. Anything else is a delivery failure.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DeliveryReceipt, MessageSender, OutboundMessage};
use crate::campaign::model::Channel;
use crate::error::ChannelError;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

impl WebhookConfig {
    /// Reads `OUTREACH_{CHANNEL}_WEBHOOK_URL`; `None` when unset.
    pub fn from_env(channel: Channel) -> Option<Self> {
        let prefix = match channel {
            Channel::Dm => "OUTREACH_DM",
            Channel::Whatsapp => "OUTREACH_WHATSAPP",
            _ => return None,
        };
        let url = std::env::var(format!("{prefix}_WEBHOOK_URL")).ok()?;
        let token = std::env::var(format!("{prefix}_WEBHOOK_TOKEN"))
            .ok()
            .map(SecretString::from);
        let timeout_secs: u64 = std::env::var(format!("{prefix}_WEBHOOK_TIMEOUT_SECS"))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);
        Some(Self {
            url,
            token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    message_id: Uuid,
    channel: Channel,
    recipient: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_name: Option<&'a str>,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    id: String,
}

pub struct WebhookSender {
    name: String,
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(channel: Channel, config: WebhookConfig) -> Self {
        Self {
            name: format!("{channel}-webhook"),
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessageSender for WebhookSender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, outbound: &OutboundMessage) -> Result<DeliveryReceipt, ChannelError> {
        if outbound.recipient.trim().is_empty() {
            return Err(ChannelError::InvalidRecipient {
                name: self.name.clone(),
                reason: "empty recipient".into(),
            });
        }

        let payload = RelayPayload {
            message_id: outbound.message_id,
            channel: outbound.channel,
            recipient: &outbound.recipient,
            recipient_name: outbound.recipient_name.as_deref(),
            body: &outbound.body,
        };

        let mut request = self
            .client
            .post(&self.config.url)
            .timeout(self.config.timeout)
            .json(&payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ChannelError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.timeout,
                }
            } else {
                ChannelError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: self.name.clone(),
                reason: format!("relay returned {status}: {body}"),
            });
        }

        let parsed: RelayResponse = response.json().await.map_err(|e| ChannelError::SendFailed {
            name: self.name.clone(),
            reason: format!("unreadable relay response: {e}"),
        })?;
        tracing::info!(sender = %self.name, recipient = %outbound.recipient, "Relay accepted message");
        Ok(DeliveryReceipt::new(parsed.id))
    }
}
