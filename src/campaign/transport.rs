//! Outbound SMTP.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{Message, SmtpTransport, Transport};
use tracing::debug;

use crate::error::{PoolError, Result};

/// Body encoding of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Plain,
    Html,
}

/// One message ready to hand to a transport.
#[derive(Debug, Clone)]
pub struct OutgoingMail<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub kind: BodyKind,
}

/// A single failed send; the text is what ends up after `failure:`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SendError(pub String);

/// A connection that can deliver messages one at a time.
pub trait MailTransport {
    /// Check the relay is reachable. Failure aborts the whole campaign.
    fn open(&self) -> Result<()>;

    /// Deliver one message. Errors are per recipient and never fatal.
    fn send_mail(&self, mail: &OutgoingMail<'_>) -> std::result::Result<(), SendError>;
}

/// Plain SMTP relay without TLS or authentication.
pub struct SmtpMailer {
    host: String,
    port: u16,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            transport: SmtpTransport::builder_dangerous(host).port(port).build(),
        }
    }
}

impl MailTransport for SmtpMailer {
    fn open(&self) -> Result<()> {
        match self.transport.test_connection() {
            Ok(true) => {
                debug!(host = %self.host, port = self.port, "SMTP relay reachable");
                Ok(())
            }
            Ok(false) => Err(PoolError::Transport(format!(
                "{}:{} did not accept a connection",
                self.host, self.port
            ))),
            Err(e) => Err(PoolError::Transport(format!(
                "{}:{}: {e}",
                self.host, self.port
            ))),
        }
    }

    fn send_mail(&self, mail: &OutgoingMail<'_>) -> std::result::Result<(), SendError> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| SendError(format!("bad sender '{}': {e}", mail.from)))?;
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| SendError(format!("bad recipient '{}': {e}", mail.to)))?;
        let content_type = match mail.kind {
            BodyKind::Plain => ContentType::TEXT_PLAIN,
            BodyKind::Html => ContentType::TEXT_HTML,
        };

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject)
            .header(content_type)
            .body(mail.body.to_string())
            .map_err(|e| SendError(e.to_string()))?;

        self.transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| SendError(e.to_string()))
    }
}
