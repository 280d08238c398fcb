//! Mail transport - hands rendered messages to the outbound relay

use async_trait::async_trait;
use chrono::Utc;
use gazette_common::config::SmtpConfig;
use lettre::{
    message::{
        header::{Header, HeaderName, HeaderValue},
        Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Why a message could not be handed over
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by relay: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Fully rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_address: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub list_unsubscribe: String,
}

/// Outbound transport
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one message, returning its Message-ID
    async fn send(&self, message: &OutgoingMessage) -> Result<String, TransportError>;
}

/// RFC 2369 `List-Unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// RFC 8058 one-click unsubscribe marker
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListUnsubscribePost;

impl Header for ListUnsubscribePost {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe-Post")
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "List-Unsubscribe=One-Click".to_string())
    }
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, TransportError> {
    let address: Address = address
        .trim()
        .parse()
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?;
    Ok(Mailbox::new(
        name.filter(|n| !n.trim().is_empty()).map(str::to_string),
        address,
    ))
}

/// Build the MIME message with unsubscribe headers and a fresh Message-ID
pub fn build_message(message: &OutgoingMessage) -> Result<(Message, String), TransportError> {
    let from = mailbox(message.from_name.as_deref(), &message.from_address)?;
    let to = mailbox(message.to_name.as_deref(), &message.to_address)?;

    let msg_id = format!(
        "<{}.{}@{}>",
        Uuid::new_v4(),
        Utc::now().timestamp(),
        from.email.domain()
    );

    let builder = Message::builder()
        .from(from)
        .to(to)
        .subject(&message.subject)
        .message_id(Some(msg_id.clone()))
        .header(ListUnsubscribe(message.list_unsubscribe.clone()))
        .header(ListUnsubscribePost);

    let email = match &message.text_body {
        Some(text) => builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(text.clone()))
                .singlepart(SinglePart::html(message.html_body.clone())),
        ),
        None => builder.singlepart(SinglePart::html(message.html_body.clone())),
    }
    .map_err(|e| TransportError::Build(e.to_string()))?;

    Ok((email, msg_id))
}

/// SMTP relay transport (lettre)
pub struct SmtpMailTransport {
    mailer: Result<AsyncSmtpTransport<Tokio1Executor>, String>,
    timeout: Duration,
}

impl SmtpMailTransport {
    /// A relay that cannot be configured is reported on every send, so the
    /// worker records each recipient as failed instead of refusing to start.
    pub fn new(config: &SmtpConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);

        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| format!("Failed to create SMTP transport: {}", e))
        } else if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| format!("Failed to create SMTP transport: {}", e))
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &config.host,
            ))
        };

        let mailer = builder.map(|builder| {
            let mut builder = builder.port(config.port).timeout(Some(timeout));
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            builder.build()
        });

        info!(
            host = %config.host,
            port = config.port,
            tls = config.use_tls,
            starttls = config.use_starttls,
            "SMTP transport configured"
        );

        Self { mailer, timeout }
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<String, TransportError> {
        let mailer = self
            .mailer
            .as_ref()
            .map_err(|e| TransportError::Unavailable(e.clone()))?;
        let (email, msg_id) = build_message(message)?;

        match tokio::time::timeout(self.timeout, mailer.send(email)).await {
            Err(_) => Err(TransportError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_permanent() => Err(TransportError::Rejected(e.to_string())),
            Ok(Err(e)) => Err(TransportError::Unavailable(e.to_string())),
            Ok(Ok(response)) => {
                debug!(message_id = %msg_id, code = %response.code(), "Relay accepted message");
                Ok(msg_id)
            }
        }
    }
}

/// Dry-run transport: logs instead of relaying
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<String, TransportError> {
        let (_, msg_id) = build_message(message)?;
        info!(
            to = %message.to_address,
            subject = %message.subject,
            message_id = %msg_id,
            "Dry run: message not relayed"
        );
        Ok(msg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            from_address: "infos@annuaire.example".to_string(),
            from_name: Some("Annuaire du quartier".to_string()),
            to_address: "marc@garage.example".to_string(),
            to_name: Some("Marc".to_string()),
            subject: "La lettre de mai".to_string(),
            html_body: "<p>Bonjour</p>".to_string(),
            text_body: Some("Bonjour".to_string()),
            list_unsubscribe: "<https://annuaire.example/track/unsubscribe?c=1>".to_string(),
        }
    }

    #[test]
    fn test_build_message_headers() {
        let (email, msg_id) = build_message(&message()).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();

        assert!(msg_id.ends_with("@annuaire.example>"));
        assert!(raw.contains("List-Unsubscribe: <https://annuaire.example/track/unsubscribe?c=1>"));
        assert!(raw.contains("List-Unsubscribe-Post: List-Unsubscribe=One-Click"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_invalid_recipient_address() {
        let mut msg = message();
        msg.to_address = "not an address".to_string();
        assert!(matches!(
            build_message(&msg),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_log_transport_accepts() {
        let id = LogTransport.send(&message()).await.unwrap();
        assert!(id.starts_with('<'));
    }
}
