//! Mailers: the units that actually send a message
//!
//! Every mailer slug has an [`OptionsDescriptor`] in the catalog. A slug may
//! also have a [`Mailer`] factory and an [`AuthHandle`] factory registered in
//! the [`MailerRegistry`].

pub mod builtin;
pub mod catalog;
pub mod oauth;
pub mod registry;

pub use builtin::BuiltinMailer;
pub use oauth::{OAuthAuth, OAuthProvider, OAuthSmtpMailer};
pub use registry::{AuthFactory, MailerFactory, MailerRegistry, ProviderEntry};

use crate::message::{MessageError, OutboundMessage};
use crate::transport::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mailer errors
#[derive(Error, Debug)]
pub enum MailerError {
    #[error("No mailer registered for '{0}'")]
    NotRegistered(String),

    #[error("Mailer '{0}' is not fully configured")]
    Incomplete(String),

    #[error("Mailer '{0}' is not compatible with this runtime")]
    Incompatible(String),

    #[error("Provider rejected the message: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

pub type MailerResult<T> = Result<T, MailerError>;

/// Generic fields a mailer honors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    FromEmail,
    FromName,
    FromEmailForce,
    FromNameForce,
    ReturnPath,
}

/// How a mailer authenticates against its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Password,
    ApiKey,
    OAuth,
}

/// Version of the hosting runtime, compared against descriptor minimums
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Version of this crate
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or(Self::new(0, 0, 0))
    }
}

impl FromStr for RuntimeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.').map(|part| {
            part.parse::<u32>()
                .map_err(|_| format!("Invalid version component '{}' in '{}'", part, s))
        });

        let major = parts
            .next()
            .ok_or_else(|| format!("Empty version '{}'", s))??;
        let minor = parts.next().transpose()?.unwrap_or(0);
        let patch = parts.next().transpose()?.unwrap_or(0);

        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Static metadata of a mailer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsDescriptor {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
    pub min_runtime: Option<RuntimeVersion>,
    pub recommended: bool,
    pub disabled: bool,
    pub auth: AuthKind,
}

impl OptionsDescriptor {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            description: String::new(),
            capabilities: Vec::new(),
            min_runtime: None,
            recommended: false,
            disabled: false,
            auth: AuthKind::None,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Descriptors without a slug or title are never listed
    pub fn is_listable(&self) -> bool {
        !self.slug.trim().is_empty() && !self.title.trim().is_empty()
    }
}

/// A unit able to send one message through a provider
#[async_trait]
pub trait Mailer: Send {
    /// Attempt delivery; [`Mailer::is_email_sent`] reports the final state
    async fn send(&mut self, message: &OutboundMessage) -> MailerResult<()>;

    fn is_email_sent(&self) -> bool;

    fn is_runtime_compatible(&self) -> bool {
        true
    }

    /// Whether every setting required to send is present
    fn is_mailer_complete(&self) -> bool;

    /// Provider error from the last send
    fn response_error(&self) -> Option<String>;

    /// Configuration summary and protocol details for diagnostics
    fn debug_info(&self) -> String;
}

/// Authorization state of a mailer that needs one
pub trait AuthHandle: Send + Sync {
    /// True while the mailer cannot send until the operator authorizes it
    fn is_auth_required(&self) -> bool;

    /// Whether client credentials were saved
    fn is_client_saved(&self) -> bool;

    fn access_token(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_version_parsing() {
        let version: RuntimeVersion = "1.4".parse().unwrap();
        assert_eq!(version, RuntimeVersion::new(1, 4, 0));
        assert_eq!(version.to_string(), "1.4.0");
        assert!("1.x".parse::<RuntimeVersion>().is_err());
        assert!(RuntimeVersion::new(2, 0, 0) > RuntimeVersion::new(1, 9, 9));
    }

    #[test]
    fn test_descriptor_listable() {
        let descriptor = OptionsDescriptor::new("mailgun", "Mailgun");
        assert!(descriptor.is_listable());
        assert!(!OptionsDescriptor::new("mailgun", " ").is_listable());
        assert!(!OptionsDescriptor::new("", "Mailgun").is_listable());
    }
}
