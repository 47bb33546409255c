//! Builtin transports
//!
//! The dispatch gate never talks to `lettre` directly. It asks a
//! [`TransportFactory`] for either the local builtin transport or an SMTP
//! transport built from resolved settings, then hands it a finished
//! [`lettre::Message`].

pub mod sendmail;
pub mod smtp;

pub use sendmail::SendmailTransport;
pub use smtp::{Encryption, SmtpAuth, SmtpParameters, SmtpTransport, TlsMode};

use crate::message::MessageError;
use async_trait::async_trait;
use lettre::Message;
use std::path::PathBuf;
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS configuration failed: {0}")]
    Tls(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Sendmail error: {0}")]
    Sendmail(#[from] lettre::transport::sendmail::Error),

    #[error("Server rejected the message: {0}")]
    Rejected(String),

    #[error(transparent)]
    Message(#[from] MessageError),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Protocol notes captured during one delivery
///
/// Recording is a no-op unless the trace was created enabled.
#[derive(Debug, Clone, Default)]
pub struct TransportTrace {
    enabled: bool,
    lines: Vec<String>,
}

impl TransportTrace {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, line: impl Into<String>) {
        if self.enabled {
            self.lines.push(line.into());
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines joined with CRLF, as appended to debug events
    pub fn render(&self) -> String {
        self.lines.join("\r\n")
    }
}

/// A transport able to deliver a finished message
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn deliver(&self, message: &Message, trace: &mut TransportTrace) -> TransportResult<()>;
}

/// Builds the builtin transports
pub trait TransportFactory: Send + Sync {
    /// The local transport used when no mailer is configured
    fn builtin(&self) -> TransportResult<Box<dyn Transport>>;

    /// A generic SMTP transport
    fn smtp(&self, params: &SmtpParameters) -> TransportResult<Box<dyn Transport>>;
}

/// Default factory backed by `lettre`
#[derive(Debug, Clone, Default)]
pub struct LettreTransports {
    sendmail_command: Option<PathBuf>,
}

impl LettreTransports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific sendmail binary instead of the one on `PATH`
    pub fn with_sendmail_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.sendmail_command = Some(command.into());
        self
    }
}

impl TransportFactory for LettreTransports {
    fn builtin(&self) -> TransportResult<Box<dyn Transport>> {
        let transport = match &self.sendmail_command {
            Some(command) => SendmailTransport::with_command(command.clone()),
            None => SendmailTransport::new(),
        };
        Ok(Box::new(transport))
    }

    fn smtp(&self, params: &SmtpParameters) -> TransportResult<Box<dyn Transport>> {
        Ok(Box::new(SmtpTransport::new(params)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_trace_records_nothing() {
        let mut trace = TransportTrace::disabled();
        trace.record("EHLO");
        assert!(trace.is_empty());

        let mut trace = TransportTrace::new(true);
        trace.record("EHLO");
        trace.record("250 OK");
        assert_eq!(trace.render(), "EHLO\r\n250 OK");
    }

    #[tokio::test]
    async fn test_factory_builds_both_transports() {
        let factory = LettreTransports::new().with_sendmail_command("/usr/sbin/sendmail");
        assert_eq!(factory.builtin().unwrap().name(), "sendmail");

        let params = SmtpParameters::new("smtp.example.com", 587);
        assert_eq!(factory.smtp(&params).unwrap().name(), "smtp");
    }
}
