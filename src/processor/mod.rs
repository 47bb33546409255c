//! Per-message policy applied before a message leaves the process
//!
//! The builder rewrites the sender, injects Reply-To and BCC addresses and
//! works out which transport the message is handed to. It never sends.

use crate::config::{ConfigResolver, BUILTIN_MAILER};
use crate::connection::Connection;
use crate::diagnostics::DiagnosticsSink;
use crate::mailer::{catalog, Capability};
use crate::message::{EmailAddress, OutboundMessage};
use crate::site::SiteContext;
use crate::transport::{Encryption, SmtpAuth, SmtpParameters};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Sender address decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromAddress {
    pub address: String,
    /// Keep the caller's display name as well
    pub preserve_name: bool,
}

/// Where a processed message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPlan {
    /// Local sendmail
    Builtin,
    /// Generic SMTP server
    Smtp(SmtpParameters),
    /// A registered provider mailer
    Provider(String),
}

/// Outcome of [`OutboundMessageBuilder::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Left as the host would send it
    Skipped(OutboundMessage),
    Ready {
        message: OutboundMessage,
        plan: TransportPlan,
    },
}

/// SMTP settings resolved from a connection's options
pub fn smtp_parameters(options: &ConfigResolver) -> SmtpParameters {
    let port = options
        .get_int("smtp", "port")
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port > 0)
        .unwrap_or(DEFAULT_SMTP_PORT);

    let mut params = SmtpParameters::new(options.get_str("smtp", "host").trim(), port)
        .with_encryption(Encryption::from_option(&options.get_str("smtp", "encryption")))
        .with_autotls(options.get_bool("smtp", "autotls"))
        .with_insecure_ssl(options.get_bool("smtp", "insecure_ssl"));

    let username = options.get_str("smtp", "user");
    if options.get_bool("smtp", "auth") && !username.trim().is_empty() {
        params = params.with_auth(SmtpAuth::Password {
            username: username.trim().to_string(),
            password: options.get_str("smtp", "pass"),
        });
    }

    params
}

/// Applies sender, reply-to, BCC and transport policy for one connection
pub struct OutboundMessageBuilder<'a> {
    connection: &'a Connection,
    site: &'a SiteContext,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl<'a> OutboundMessageBuilder<'a> {
    pub fn new(
        connection: &'a Connection,
        site: &'a SiteContext,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            connection,
            site,
            diagnostics,
        }
    }

    fn options(&self) -> &ConfigResolver {
        self.connection.options()
    }

    /// Whether processing is skipped and the message left to the host
    pub fn should_skip(&self, domain_blocked: bool, force: bool) -> bool {
        if force {
            return false;
        }

        let options = self.options();
        let unconfigured = options.get_str("mail", "from_email").trim().is_empty()
            && options.get_str("mail", "from_name").trim().is_empty();

        unconfigured || domain_blocked
    }

    /// Fill in what the host itself would put on a bare message
    pub fn apply_host_defaults(&self, message: &mut OutboundMessage) {
        if message.from.is_none() {
            message.from = Some(EmailAddress::new(self.site.default_from_email()));
        }
    }

    /// Decide the sender address
    ///
    /// An excluded configured address short-circuits everything else and
    /// also pins the display name.
    pub fn filter_from_address(&self, candidate: &str) -> FromAddress {
        let options = self.options();
        let candidate = candidate.trim();
        let configured = options.get_str("mail", "from_email").trim().to_string();

        let excluded = !configured.is_empty()
            && options
                .get_list("mail", "from_email_exclusions")
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(&configured));
        if excluded {
            debug!("Configured sender {} is excluded, keeping {}", configured, candidate);
            return FromAddress {
                address: candidate.to_string(),
                preserve_name: true,
            };
        }

        let address = if options.get_bool("mail", "from_email_force") && !configured.is_empty() {
            configured
        } else if !candidate.is_empty()
            && !candidate.eq_ignore_ascii_case(&self.site.default_from_email())
        {
            candidate.to_string()
        } else if !configured.is_empty() {
            configured
        } else if candidate.is_empty() {
            self.site.default_from_email()
        } else {
            candidate.to_string()
        };

        FromAddress {
            address,
            preserve_name: false,
        }
    }

    /// Decide the sender display name
    pub fn filter_from_name(&self, candidate: &str, from: &FromAddress) -> String {
        if from.preserve_name {
            return candidate.to_string();
        }

        let options = self.options();
        let configured = options.get_str("mail", "from_name");
        let force = options.get_bool("mail", "from_name_force");

        if (force || candidate.trim().is_empty()) && !configured.trim().is_empty() {
            configured
        } else {
            candidate.to_string()
        }
    }

    /// Resolve the transport and apply transport level settings
    pub fn prepare_transport(&self, message: &mut OutboundMessage) -> TransportPlan {
        let slug = self.connection.mailer_slug();

        let return_path = self.options().get_bool("mail", "return_path")
            && catalog::descriptor(&slug)
                .map(|descriptor| descriptor.supports(Capability::ReturnPath))
                .unwrap_or(false);
        if return_path {
            message.envelope_sender = message.from.as_ref().map(|from| from.email.clone());
        }

        match slug.as_str() {
            catalog::SMTP_MAILER => TransportPlan::Smtp(smtp_parameters(self.options())),
            BUILTIN_MAILER => TransportPlan::Builtin,
            _ => TransportPlan::Provider(slug),
        }
    }

    /// Add the configured Reply-To, replacing an entry that equals the sender
    /// when substitute mode is on
    pub fn apply_reply_to(&self, message: &mut OutboundMessage) {
        let options = self.options();
        let configured = options.get_str("mail", "reply_to_email");
        if configured.trim().is_empty() {
            return;
        }

        let reply_to = match EmailAddress::parse(&configured) {
            Ok(address) => address,
            Err(e) => {
                warn!("Ignoring configured Reply-To: {}", e);
                return;
            }
        };

        if options.get_bool("mail", "reply_to_replace_from") {
            let sender = message.from.as_ref().map(|from| from.email.clone());
            if let Some(sender) = sender {
                if let Some(entry) = message
                    .reply_to
                    .iter_mut()
                    .find(|entry| entry.same_address(&sender))
                {
                    *entry = reply_to;
                    return;
                }
            }
        }

        if !message
            .reply_to
            .iter()
            .any(|entry| entry.same_address(&reply_to.email))
        {
            message.reply_to.push(reply_to);
        }
    }

    /// Add every configured BCC address, skipping invalid ones
    pub fn apply_bcc(&self, message: &mut OutboundMessage) {
        for entry in self.options().get_list("mail", "bcc_emails") {
            match EmailAddress::parse(&entry) {
                Ok(address) => message.bcc.push(address),
                Err(e) => {
                    warn!("Skipping BCC address: {}", e);
                    self.diagnostics
                        .record_debug(&format!("Skipped invalid BCC address '{}'", entry));
                }
            }
        }
    }

    /// Run the whole policy over a message
    pub fn process(
        &self,
        mut message: OutboundMessage,
        force: bool,
        domain_blocked: bool,
    ) -> Processed {
        if self.should_skip(domain_blocked, force) {
            debug!("Skipping message processing for connection {}", self.connection.id());
            self.apply_host_defaults(&mut message);
            return Processed::Skipped(message);
        }

        self.apply_host_defaults(&mut message);
        let (candidate_email, candidate_name) = match &message.from {
            Some(from) => (from.email.clone(), from.name.clone().unwrap_or_default()),
            None => (String::new(), String::new()),
        };

        let from = self.filter_from_address(&candidate_email);
        let name = self.filter_from_name(&candidate_name, &from);
        message.from = Some(EmailAddress::with_name(from.address, name));

        let plan = self.prepare_transport(&mut message);
        self.apply_reply_to(&mut message);
        self.apply_bcc(&mut message);

        Processed::Ready { message, plan }
    }
}
