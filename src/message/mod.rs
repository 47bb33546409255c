//! Outbound message model
//!
//! An [`OutboundMessage`] is what the host hands to the dispatch pipeline. The
//! processor mutates it in place, then it is converted into a
//! [`lettre::Message`] for the builtin transports or handed as-is to a
//! provider mailer.

pub mod address;

pub use address::{is_valid_email, parse_address_list, EmailAddress};

use lettre::{
    address::{AddressError, Envelope},
    message::{
        header::{ContentType, HeaderName, HeaderValue},
        Attachment as AttachmentPart, MultiPart, SinglePart,
    },
    Address, Message,
};
use std::str::FromStr;
use thiserror::Error;

/// Message construction errors
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Message format error: {0}")]
    Format(String),

    #[error("Message build error: {0}")]
    Build(#[from] lettre::error::Error),
}

pub type MessageResult<T> = Result<T, MessageError>;

/// Headers owned by the builder, never copied from the custom header list
const MANAGED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "reply-to",
    "subject",
    "date",
    "message-id",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// A file attached to the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            content,
        }
    }
}

/// One outgoing email
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Sender; the site default is used when absent
    pub from: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    /// Custom headers in insertion order
    pub headers: Vec<(String, String)>,
    pub attachments: Vec<Attachment>,
    /// SMTP envelope sender (Return-Path)
    pub envelope_sender: Option<String>,
}

impl OutboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender from `Name <address>` or a bare address
    pub fn from_str(mut self, from: &str) -> MessageResult<Self> {
        self.from = Some(EmailAddress::parse(from)?);
        Ok(self)
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    /// Add To recipients from a comma separated list
    pub fn to_str(mut self, to: &str) -> MessageResult<Self> {
        self.to.extend(parse_address_list(to)?);
        Ok(self)
    }

    pub fn to(mut self, to: EmailAddress) -> Self {
        self.to.push(to);
        self
    }

    pub fn cc(mut self, cc: EmailAddress) -> Self {
        self.cc.push(cc);
        self
    }

    pub fn reply_to(mut self, reply_to: EmailAddress) -> Self {
        self.reply_to.push(reply_to);
        self
    }

    pub fn subject<S: Into<String>>(mut self, subject: S) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn text<S: Into<String>>(mut self, body: S) -> Self {
        self.text_body = Some(body.into());
        self
    }

    pub fn html<S: Into<String>>(mut self, body: S) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Append a custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace every occurrence of a header with a single value
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .retain(|(header, _)| !header.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// All recipient addresses (to + cc + bcc)
    pub fn all_recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|address| address.email.as_str())
            .collect()
    }

    /// Domain part of the sender address
    pub fn sender_domain(&self) -> Option<&str> {
        self.from
            .as_ref()
            .and_then(|from| from.email.rsplit_once('@'))
            .map(|(_, domain)| domain.trim())
            .filter(|domain| !domain.is_empty())
    }

    /// One line description used in diagnostics
    pub fn summary(&self) -> String {
        let to = self
            .to
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("To: {}\r\nSubject: {}", to, self.subject)
    }

    /// Build the wire message
    ///
    /// `id_domain` is used as the right hand side of the generated Message-ID.
    pub fn to_lettre_message(&self, id_domain: &str) -> MessageResult<Message> {
        let from = self
            .from
            .as_ref()
            .ok_or_else(|| MessageError::Format("From address is required".to_string()))?;

        if self.all_recipients().is_empty() {
            return Err(MessageError::Format(
                "At least one recipient is required".to_string(),
            ));
        }

        let mut builder = Message::builder()
            .from(from.to_mailbox()?)
            .subject(self.subject.clone());

        for to in &self.to {
            builder = builder.to(to.to_mailbox()?);
        }
        for cc in &self.cc {
            builder = builder.cc(cc.to_mailbox()?);
        }
        for bcc in &self.bcc {
            builder = builder.bcc(bcc.to_mailbox()?);
        }
        for reply_to in &self.reply_to {
            builder = builder.reply_to(reply_to.to_mailbox()?);
        }

        builder = builder
            .message_id(Some(format!("<{}@{}>", uuid::Uuid::new_v4(), id_domain)))
            .date_now();

        for (name, value) in &self.headers {
            if MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            let header_name = HeaderName::new_from_ascii(name.clone())
                .map_err(|_| MessageError::InvalidHeader(name.clone()))?;
            builder = builder.raw_header(HeaderValue::new(header_name, value.clone()));
        }

        if let Some(sender) = &self.envelope_sender {
            let recipients = self
                .all_recipients()
                .into_iter()
                .map(|email| Address::from_str(email.trim()))
                .collect::<Result<Vec<_>, _>>()?;
            let envelope = Envelope::new(Some(Address::from_str(sender.trim())?), recipients)?;
            builder = builder.envelope(envelope);
        }

        let body = self.body();
        let message = if self.attachments.is_empty() {
            match body {
                Body::Single(part) => builder.singlepart(part),
                Body::Alternative(part) => builder.multipart(part),
            }
        } else {
            let mut mixed = match body {
                Body::Single(part) => MultiPart::mixed().singlepart(part),
                Body::Alternative(part) => MultiPart::mixed().multipart(part),
            };
            for attachment in &self.attachments {
                let content_type = ContentType::parse(&attachment.content_type).map_err(|_| {
                    MessageError::Format(format!(
                        "Invalid content type for {}: {}",
                        attachment.filename, attachment.content_type
                    ))
                })?;
                mixed = mixed.singlepart(
                    AttachmentPart::new(attachment.filename.clone())
                        .body(attachment.content.clone(), content_type),
                );
            }
            builder.multipart(mixed)
        };

        Ok(message?)
    }

    fn body(&self) -> Body {
        match (&self.text_body, &self.html_body) {
            (Some(text), Some(html)) => {
                Body::Alternative(MultiPart::alternative_plain_html(text.clone(), html.clone()))
            }
            (None, Some(html)) => {
                let text = html2text::from_read(html.as_bytes(), 78);
                Body::Alternative(MultiPart::alternative_plain_html(text, html.clone()))
            }
            (Some(text), None) => Body::Single(SinglePart::plain(text.clone())),
            (None, None) => Body::Single(SinglePart::plain(String::new())),
        }
    }
}

enum Body {
    Single(SinglePart),
    Alternative(MultiPart),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutboundMessage {
        OutboundMessage::new()
            .from_str("Site <site@example.com>")
            .unwrap()
            .to_str("user@example.org")
            .unwrap()
            .subject("Welcome")
            .text("Hello")
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let mut message = sample().header("X-Mailer-Type", "Mailgate/Admin/Test");
        assert_eq!(message.header_value("x-mailer-type"), Some("Mailgate/Admin/Test"));

        message.set_header("x-mailer-type", "other");
        assert_eq!(message.headers.len(), 1);
        assert_eq!(message.header_value("X-Mailer-Type"), Some("other"));
        assert!(message.header_value("X-Missing").is_none());
    }

    #[test]
    fn test_build_lettre_message() {
        let message = sample()
            .reply_to(EmailAddress::new("reply@example.com"))
            .header("X-Custom", "value")
            .header("Subject", "ignored")
            .to_lettre_message("example.com")
            .unwrap();

        let headers = message.headers();
        assert!(headers.get_raw("From").is_some());
        assert!(headers.get_raw("Reply-To").is_some());
        assert_eq!(headers.get_raw("X-Custom"), Some("value"));
        assert_eq!(headers.get_raw("Subject"), Some("Welcome"));
        assert!(headers.get_raw("Message-ID").unwrap().ends_with("@example.com>"));
    }

    #[test]
    fn test_envelope_sender_and_bcc() {
        let mut outbound = sample();
        outbound.bcc.push(EmailAddress::new("hidden@example.net"));
        outbound.envelope_sender = Some("bounce@example.com".to_string());

        let message = outbound.to_lettre_message("example.com").unwrap();
        let envelope = message.envelope();

        assert_eq!(envelope.from().unwrap().to_string(), "bounce@example.com");
        assert_eq!(envelope.to().len(), 2);
    }

    #[test]
    fn test_html_only_gets_text_alternative() {
        let mut outbound = sample();
        outbound.text_body = None;
        outbound.html_body = Some("<p>Hello <b>there</b></p>".to_string());

        let formatted = String::from_utf8(
            outbound
                .to_lettre_message("example.com")
                .unwrap()
                .formatted(),
        )
        .unwrap();

        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("text/plain"));
    }

    #[test]
    fn test_missing_parts_are_rejected() {
        let mut outbound = sample();
        outbound.from = None;
        assert!(outbound.to_lettre_message("example.com").is_err());

        let mut outbound = sample();
        outbound.to.clear();
        assert!(outbound.to_lettre_message("example.com").is_err());
    }

    #[test]
    fn test_attachment_makes_mixed_message() {
        let formatted = String::from_utf8(
            sample()
                .attach(Attachment::new("notes.txt", "text/plain", b"notes".to_vec()))
                .to_lettre_message("example.com")
                .unwrap()
                .formatted(),
        )
        .unwrap();

        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("notes.txt"));
    }
}
