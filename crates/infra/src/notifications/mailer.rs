//! Outgoing mail transport: SMTP when configured, the log otherwise.

use std::fmt;

use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::{debug, info};

/// Implicit-TLS submission port; every other port upgrades with STARTTLS.
pub const SMTPS_PORT: u16 = 465;
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport rejected message: {0}")]
    Rejected(String),

    #[error("invalid mail address or header: {0}")]
    Message(String),

    #[error("mail transport unavailable: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub attachments: Vec<Attachment>,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<(), MailError>;
}

impl<M> Mailer for std::sync::Arc<M>
where
    M: Mailer + ?Sized,
{
    fn send(&self, email: &Email) -> Result<(), MailError> {
        (**self).send(email)
    }
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, email: &Email) -> Result<(), MailError> {
        info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "email sent (log transport)"
        );
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Delivers mail through an SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
    host: String,
    port: u16,
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let builder = if settings.port == SMTPS_PORT {
            SmtpTransport::relay(&settings.host)
        } else {
            SmtpTransport::starttls_relay(&settings.host)
        }
        .map_err(|e| MailError::Transport(e.to_string()))?
        .port(settings.port);

        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            host: settings.host.clone(),
            port: settings.port,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = build_message(email)?;
        let response = self
            .transport
            .send(&message)
            .map_err(|e| MailError::Rejected(e.to_string()))?;
        debug!(to = %email.to, code = %response.code(), "email accepted by relay");
        Ok(())
    }
}

/// MIME message for `email`: plain text alone, or mixed with its attachments.
pub fn build_message(email: &Email) -> Result<Message, MailError> {
    let from: Mailbox = email
        .from
        .parse()
        .map_err(|e| MailError::Message(format!("from '{}': {e}", email.from)))?;
    let to: Mailbox = email
        .to
        .parse()
        .map_err(|e| MailError::Message(format!("to '{}': {e}", email.to)))?;

    let builder = Message::builder().from(from).to(to).subject(email.subject.clone());
    let message = if email.attachments.is_empty() {
        builder.singlepart(SinglePart::plain(email.text_body.clone()))
    } else {
        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(email.text_body.clone()));
        for a in &email.attachments {
            let content_type = ContentType::parse(&a.content_type)
                .map_err(|e| MailError::Message(format!("content type '{}': {e}", a.content_type)))?;
            parts = parts.singlepart(
                MimeAttachment::new(a.file_name.clone()).body(a.body.clone(), content_type),
            );
        }
        builder.multipart(parts)
    };
    message.map_err(|e| MailError::Message(e.to_string()))
}
