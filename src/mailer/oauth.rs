//! SMTP mailers for account based providers authorized with OAuth2
//!
//! Only the sending half lives here. Obtaining and refreshing the access
//! token happens elsewhere; these mailers read whatever token is stored.

use super::{AuthHandle, Mailer, MailerError, MailerResult};
use crate::config::ConfigResolver;
use crate::message::OutboundMessage;
use crate::transport::{Encryption, SmtpAuth, SmtpParameters, TransportFactory, TransportTrace};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// SMTP endpoint and authorization URLs of an OAuth provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProvider {
    pub slug: &'static str,
    pub display_name: &'static str,
    pub smtp_server: &'static str,
    pub smtp_port: u16,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub scopes: &'static [&'static str],
}

pub static GMAIL: OAuthProvider = OAuthProvider {
    slug: "gmail",
    display_name: "Google / Gmail",
    smtp_server: "smtp.gmail.com",
    smtp_port: 587,
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &["https://mail.google.com/"],
};

pub static OUTLOOK: OAuthProvider = OAuthProvider {
    slug: "outlook",
    display_name: "365 / Outlook",
    smtp_server: "smtp-mail.outlook.com",
    smtp_port: 587,
    auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
    token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
    scopes: &["https://outlook.office.com/SMTP.Send", "offline_access"],
};

static PROVIDERS: &[&OAuthProvider] = &[&GMAIL, &OUTLOOK];

impl OAuthProvider {
    pub fn find(slug: &str) -> Option<&'static OAuthProvider> {
        PROVIDERS.iter().copied().find(|provider| provider.slug == slug)
    }

    fn smtp_parameters(&self, username: String, access_token: String) -> SmtpParameters {
        SmtpParameters::new(self.smtp_server, self.smtp_port)
            .with_encryption(Encryption::Tls)
            .with_auth(SmtpAuth::OAuth2 {
                username,
                access_token,
            })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

/// Authorization state read from the connection's options
pub struct OAuthAuth {
    provider: &'static OAuthProvider,
    options: ConfigResolver,
}

impl OAuthAuth {
    pub fn new(provider: &'static OAuthProvider, options: ConfigResolver) -> Self {
        Self { provider, options }
    }
}

impl AuthHandle for OAuthAuth {
    fn is_auth_required(&self) -> bool {
        !self.is_client_saved() || self.access_token().is_none()
    }

    fn is_client_saved(&self) -> bool {
        let slug = self.provider.slug;
        !self.options.get_str(slug, "client_id").trim().is_empty()
            && !self.options.get_str(slug, "client_secret").trim().is_empty()
    }

    fn access_token(&self) -> Option<String> {
        non_empty(self.options.get_str(self.provider.slug, "access_token"))
    }
}

/// Sends as the authorized account over SMTP with XOAUTH2
pub struct OAuthSmtpMailer {
    provider: &'static OAuthProvider,
    options: ConfigResolver,
    transports: Arc<dyn TransportFactory>,
    sent: bool,
    error: Option<String>,
    trace: TransportTrace,
}

impl OAuthSmtpMailer {
    pub fn new(
        provider: &'static OAuthProvider,
        options: ConfigResolver,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            provider,
            options,
            transports,
            sent: false,
            error: None,
            trace: TransportTrace::new(true),
        }
    }

    fn user(&self) -> Option<String> {
        non_empty(self.options.get_str(self.provider.slug, "user"))
    }

    fn access_token(&self) -> Option<String> {
        non_empty(self.options.get_str(self.provider.slug, "access_token"))
    }

    async fn deliver(&mut self, message: &OutboundMessage) -> MailerResult<()> {
        let (Some(user), Some(token)) = (self.user(), self.access_token()) else {
            return Err(MailerError::Incomplete(self.provider.slug.to_string()));
        };

        // The provider only relays mail from the authorized account
        let mut message = message.clone();
        if let Some(from) = message.from.as_mut() {
            if !from.same_address(&user) {
                debug!("Rewriting sender {} to authorized account {}", from.email, user);
                from.email = user.clone();
            }
        }

        let params = self.provider.smtp_parameters(user, token);
        let transport = self.transports.smtp(&params)?;
        let email = message.to_lettre_message(message.sender_domain().unwrap_or("localhost"))?;
        transport.deliver(&email, &mut self.trace).await?;

        Ok(())
    }
}

#[async_trait]
impl Mailer for OAuthSmtpMailer {
    async fn send(&mut self, message: &OutboundMessage) -> MailerResult<()> {
        self.sent = false;
        self.error = None;

        match self.deliver(message).await {
            Ok(()) => {
                self.sent = true;
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn is_email_sent(&self) -> bool {
        self.sent
    }

    fn is_mailer_complete(&self) -> bool {
        self.user().is_some() && self.access_token().is_some()
    }

    fn response_error(&self) -> Option<String> {
        self.error.clone()
    }

    fn debug_info(&self) -> String {
        let mut info = format!(
            "Mailer: {}\r\nHost: {}:{}\r\nUser: {}\r\nAccess token: {}",
            self.provider.display_name,
            self.provider.smtp_server,
            self.provider.smtp_port,
            self.user().unwrap_or_else(|| "(not set)".to_string()),
            if self.access_token().is_some() { "present" } else { "missing" },
        );
        if !self.trace.is_empty() {
            info.push_str("\r\n");
            info.push_str(&self.trace.render());
        }
        info
    }
}
