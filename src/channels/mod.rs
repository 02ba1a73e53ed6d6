//! Outbound delivery: one sender per channel behind a common trait.

pub mod email;
pub mod webhook;

pub use email::{EmailConfig, EmailSender};
pub use webhook::{WebhookConfig, WebhookSender};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaign::model::Channel;
use crate::error::ChannelError;

/// A fully resolved message ready for a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: Uuid,
    pub channel: Channel,
    /// Email address, social handle, or phone number.
    pub recipient: String,
    pub recipient_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
}

/// What a transport hands back on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub transport_id: String,
    pub sent_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    pub fn new(transport_id: impl Into<String>) -> Self {
        Self {
            transport_id: transport_id.into(),
            sent_at: Utc::now(),
        }
    }
}

/// Delivers approved messages.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sender name for logs and errors.
    fn name(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ChannelError>;
}

/// Dispatches to a sender per channel.
pub struct ChannelRouter {
    senders: HashMap<Channel, Arc<dyn MessageSender>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    pub fn with(mut self, channel: Channel, sender: Arc<dyn MessageSender>) -> Self {
        info!(channel = %channel, sender = sender.name(), "Registered sender");
        self.senders.insert(channel, sender);
        self
    }

    pub fn has(&self, channel: Channel) -> bool {
        self.senders.contains_key(&channel)
    }
}

impl Default for ChannelRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSender for ChannelRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ChannelError> {
        let sender = self
            .senders
            .get(&message.channel)
            .ok_or_else(|| ChannelError::NotConfigured {
                name: message.channel.to_string(),
            })?;
        sender.send(message).await
    }
}

/// Records messages instead of delivering them.
///
/// Used when no transport is configured, and in tests.
pub struct DryRunSender {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything "sent" so far.
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

impl Default for DryRunSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSender for DryRunSender {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ChannelError> {
        debug!(
            message_id = %message.message_id,
            recipient = %message.recipient,
            "Dry run: message not delivered"
        );
        self.sent.lock().await.push(message.clone());
        Ok(DeliveryReceipt::new(format!("dry-run-{}", message.message_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(channel: Channel) -> OutboundMessage {
        OutboundMessage {
            message_id: Uuid::new_v4(),
            channel,
            recipient: "someone@example.com".into(),
            recipient_name: None,
            subject: None,
            body: "hi".into(),
        }
    }

    #[tokio::test]
    async fn dry_run_records() {
        let sender = DryRunSender::new();
        let receipt = sender.send(&outbound(Channel::Email)).await.unwrap();
        assert!(receipt.transport_id.starts_with("dry-run-"));
        assert_eq!(sender.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn router_dispatches_by_channel() {
        let email = Arc::new(DryRunSender::new());
        let router = ChannelRouter::new().with(Channel::Email, email.clone());
        assert!(router.has(Channel::Email));

        router.send(&outbound(Channel::Email)).await.unwrap();
        assert_eq!(email.sent().await.len(), 1);

        let err = router.send(&outbound(Channel::Dm)).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured { .. }));
    }
}
