//! Email delivery over SMTP via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use super::{DeliveryReceipt, MessageSender, OutboundMessage};
use crate::error::ChannelError;

/// Fallback subject when a draft has none.
const DEFAULT_SUBJECT: &str = "Quick note";

/// SMTP configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub from_name: Option<String>,
}

impl EmailConfig {
    /// Returns `None` if `OUTREACH_SMTP_HOST` is not set (email disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("OUTREACH_SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("OUTREACH_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("OUTREACH_SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("OUTREACH_SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("OUTREACH_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let from_name = std::env::var("OUTREACH_FROM_NAME").ok();

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password: SecretString::from(password),
            from_address,
            from_name,
        })
    }
}

/// Sends email drafts through an SMTP relay.
pub struct EmailSender {
    config: EmailConfig,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn send_failed(reason: String) -> ChannelError {
        ChannelError::SendFailed {
            name: "email".into(),
            reason,
        }
    }
}

/// Build the RFC 5322 message for an outbound draft.
pub(crate) fn build_message(
    config: &EmailConfig,
    outbound: &OutboundMessage,
) -> Result<Message, ChannelError> {
    let from: Mailbox = match &config.from_name {
        Some(name) => format!("{} <{}>", name, config.from_address).parse(),
        None => config.from_address.parse(),
    }
    .map_err(|e| EmailSender::send_failed(format!("Invalid from address: {e}")))?;

    let to: Mailbox = outbound
        .recipient
        .parse()
        .map_err(|e| ChannelError::InvalidRecipient {
            name: "email".into(),
            reason: format!("{}: {e}", outbound.recipient),
        })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(outbound.subject.as_deref().unwrap_or(DEFAULT_SUBJECT))
        .body(outbound.body.clone())
        .map_err(|e| EmailSender::send_failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl MessageSender for EmailSender {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, outbound: &OutboundMessage) -> Result<DeliveryReceipt, ChannelError> {
        let email = build_message(&self.config, outbound)?;
        let config = self.config.clone();
        let to = outbound.recipient.clone();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );
            let transport = SmtpTransport::relay(&config.smtp_host)
                .map_err(|e| EmailSender::send_failed(format!("SMTP relay error: {e}")))?
                .port(config.smtp_port)
                .credentials(creds)
                .build();

            let response = transport
                .send(&email)
                .map_err(|e| EmailSender::send_failed(format!("SMTP send failed: {e}")))?;

            tracing::info!("Email sent to {to}");
            let transport_id = response
                .message()
                .next()
                .map(|line| line.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            Ok(DeliveryReceipt::new(transport_id))
        })
        .await
        .map_err(|e| EmailSender::send_failed(format!("SMTP task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::model::Channel;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "me".into(),
            password: SecretString::from("pw".to_string()),
            from_address: "me@example.com".into(),
            from_name: Some("Outreach Team".into()),
        }
    }

    fn outbound(recipient: &str, subject: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            message_id: Uuid::new_v4(),
            channel: Channel::Email,
            recipient: recipient.into(),
            recipient_name: None,
            subject: subject.map(String::from),
            body: "Hello there".into(),
        }
    }

    #[test]
    fn builds_message_with_subject() {
        let msg = build_message(&config(), &outbound("ann@hotel.com", Some("Partnership"))).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: Partnership"));
        assert!(raw.contains("ann@hotel.com"));
        assert!(raw.contains("Outreach Team"));
    }

    #[test]
    fn missing_subject_uses_default() {
        let msg = build_message(&config(), &outbound("ann@hotel.com", None)).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains(DEFAULT_SUBJECT));
    }

    #[test]
    fn invalid_recipient_is_reported() {
        let err = build_message(&config(), &outbound("@handle", None)).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidRecipient { .. }));
    }
}
