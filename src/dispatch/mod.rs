//! The per-message send pipeline
//!
//! ```text
//! Init -> SkipCheck -> BlockCheck -> TestEmailCheck -> BuiltinSend | ProviderSend -> Classify
//! ```
//!
//! Every message is dispatched at most once; there is no retry here.

pub mod domain;

pub use domain::DomainCheck;

use crate::config::BUILTIN_MAILER;
use crate::connection::{Connection, ConnectionManager};
use crate::diagnostics::DiagnosticsSink;
use crate::mailer::{MailerError, MailerRegistry};
use crate::message::OutboundMessage;
use crate::processor::{OutboundMessageBuilder, Processed, TransportPlan};
use crate::site::SiteContext;
use crate::transport::{TransportFactory, TransportTrace};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Header carrying the test markers
pub const MAILER_TYPE_HEADER: &str = "X-Mailer-Type";

/// Value marking an interactive test send
pub const TEST_MARKER: &str = "Mailgate/Admin/Test";

/// Value marking an automated setup wizard test
pub const SETUP_WIZARD_MARKER: &str = "Mailgate/Admin/SetupWizard/Test";

const X_MAILER_HEADER: &str = "X-Mailer";

/// Which kind of test, if any, a message is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMarker {
    None,
    /// Interactive test: bypasses every block and enables tracing
    Test,
    /// Setup wizard test: bypasses "do not send" but not the domain check
    SetupWizard,
}

impl TestMarker {
    pub fn detect(message: &OutboundMessage) -> Self {
        match message.header_value(MAILER_TYPE_HEADER).map(str::trim) {
            Some(value) if value.ends_with("/Admin/SetupWizard/Test") => TestMarker::SetupWizard,
            Some(value) if value.ends_with("/Admin/Test") => TestMarker::Test,
            _ => TestMarker::None,
        }
    }
}

/// Per call switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Run the processor even when it would normally be skipped
    pub force_processing: bool,
    /// Return send failures as errors instead of `SoftFailed`
    pub exceptions: bool,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Sent { mailer: String },
    SoftFailed { error: String, mailer: String },
    /// Intentionally not sent
    Blocked { reason: String },
}

impl DispatchResult {
    /// What the host reports to its caller; blocked sends count as success
    pub fn is_success(&self) -> bool {
        !matches!(self, DispatchResult::SoftFailed { .. })
    }
}

/// Send failure surfaced when [`DispatchOptions::exceptions`] is set
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DispatchError {
    pub mailer: String,
    pub message: String,
    #[source]
    pub source: MailerError,
}

pub type DispatchOutcome = Result<DispatchResult, DispatchError>;

/// Names of other software known to interfere with sending
pub trait ConflictDetector: Send + Sync {
    fn detect(&self) -> Vec<String>;
}

/// Detector that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConflicts;

impl ConflictDetector for NoConflicts {
    fn detect(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Decides, per message, whether and how it is sent
pub struct DispatchGate {
    connections: ConnectionManager,
    registry: Arc<MailerRegistry>,
    transports: Arc<dyn TransportFactory>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    site: SiteContext,
    conflicts: Arc<dyn ConflictDetector>,
}

impl DispatchGate {
    pub fn new(
        connections: ConnectionManager,
        registry: Arc<MailerRegistry>,
        transports: Arc<dyn TransportFactory>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        site: SiteContext,
    ) -> Self {
        Self {
            connections,
            registry,
            transports,
            diagnostics,
            site,
            conflicts: Arc::new(NoConflicts),
        }
    }

    pub fn with_conflict_detector(mut self, conflicts: Arc<dyn ConflictDetector>) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn registry(&self) -> &MailerRegistry {
        &self.registry
    }

    /// Dispatch through the current mail connection
    pub async fn dispatch(&self, message: OutboundMessage, options: DispatchOptions) -> DispatchOutcome {
        let connection = self.connections.mail_connection();
        self.dispatch_with(connection, message, options).await
    }

    /// Dispatch through an explicit connection
    pub async fn dispatch_with(
        &self,
        connection: &Connection,
        message: OutboundMessage,
        options: DispatchOptions,
    ) -> DispatchOutcome {
        let settings = connection.options();
        let marker = TestMarker::detect(&message);
        let domain_check = DomainCheck::from_options(settings);
        let domain_blocked = domain_check.is_blocked(&self.site.domain());
        debug!(
            "dispatch: init (connection: {}, marker: {:?}, domain blocked: {})",
            connection.id(),
            marker,
            domain_blocked
        );

        let builder = OutboundMessageBuilder::new(connection, &self.site, Arc::clone(&self.diagnostics));
        let force = options.force_processing || marker == TestMarker::Test;
        debug!(
            "dispatch: skip check (skip processing: {})",
            builder.should_skip(domain_blocked, force)
        );

        if marker != TestMarker::Test {
            if marker != TestMarker::SetupWizard && settings.get_bool("general", "do_not_send") {
                let reason = "Sending is disabled by the \"do not send\" setting".to_string();
                info!("dispatch: block check ({})", reason);
                self.diagnostics
                    .record_debug(&format!("{}\r\n{}", reason, message.summary()));
                return Ok(DispatchResult::Blocked { reason });
            }

            if domain_blocked {
                if domain_check.blocks_all() {
                    let reason = format!("Domain {} is not allowed to send", self.site.domain());
                    info!("dispatch: block check ({})", reason);
                    self.diagnostics.record_debug(&format!(
                        "Blocked email from {}\r\n{}",
                        self.site.domain(),
                        message.summary()
                    ));
                    return Ok(DispatchResult::Blocked { reason });
                }

                warn!("dispatch: domain {} not allowed, using the default transport", self.site.domain());
                self.diagnostics.record_debug(&format!(
                    "Domain {} is not allowed to send, mailer settings were bypassed and the default transport was used\r\n{}",
                    self.site.domain(),
                    message.summary()
                ));
                let mut message = message;
                builder.apply_host_defaults(&mut message);
                return self
                    .builtin_send(BUILTIN_MAILER, TransportPlan::Builtin, message, false, options)
                    .await;
            }
        }

        let tracing_enabled =
            marker == TestMarker::Test || settings.get_bool("debug_events", "enabled");
        debug!("dispatch: test email check (tracing: {})", tracing_enabled);

        match builder.process(message, force, domain_blocked) {
            Processed::Skipped(message) => {
                debug!("dispatch: builtin send (unprocessed)");
                self.builtin_send(BUILTIN_MAILER, TransportPlan::Builtin, message, tracing_enabled, options)
                    .await
            }
            Processed::Ready { mut message, plan } => {
                let slug = connection.mailer_slug();
                message.set_header(
                    X_MAILER_HEADER,
                    format!("Mailgate/Mailer/{} {}", slug, env!("CARGO_PKG_VERSION")),
                );

                match plan {
                    TransportPlan::Provider(slug) => {
                        debug!("dispatch: provider send ({})", slug);
                        self.provider_send(connection, &slug, message, tracing_enabled, options)
                            .await
                    }
                    plan => {
                        debug!("dispatch: builtin send ({})", slug);
                        self.builtin_send(&slug, plan, message, tracing_enabled, options)
                            .await
                    }
                }
            }
        }
    }

    fn title_of(&self, slug: &str) -> String {
        self.registry
            .get_options(slug)
            .map(|descriptor| descriptor.title)
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| slug.to_string())
    }

    async fn builtin_send(
        &self,
        slug: &str,
        plan: TransportPlan,
        message: OutboundMessage,
        tracing_enabled: bool,
        options: DispatchOptions,
    ) -> DispatchOutcome {
        let mut trace = TransportTrace::new(tracing_enabled);
        let result = self.deliver_builtin(&plan, &message, &mut trace).await;

        match result {
            Ok(()) => Ok(self.classify_sent(slug)),
            Err(e) => {
                let detail = e.to_string();
                let trace = (!trace.is_empty()).then(|| trace.render());
                self.classify_failure(slug, detail, trace, e, options)
            }
        }
    }

    async fn deliver_builtin(
        &self,
        plan: &TransportPlan,
        message: &OutboundMessage,
        trace: &mut TransportTrace,
    ) -> Result<(), MailerError> {
        let transport = match plan {
            TransportPlan::Smtp(params) => self.transports.smtp(params)?,
            _ => self.transports.builtin()?,
        };
        let domain = message
            .sender_domain()
            .map(str::to_string)
            .unwrap_or_else(|| self.site.domain());
        let email = message.to_lettre_message(&domain)?;

        transport.deliver(&email, trace).await?;
        Ok(())
    }

    async fn provider_send(
        &self,
        connection: &Connection,
        slug: &str,
        message: OutboundMessage,
        tracing_enabled: bool,
        options: DispatchOptions,
    ) -> DispatchOutcome {
        let Some(mut mailer) = self.registry.get_mailer(slug, connection) else {
            return self.classify_failure(
                slug,
                "No mailer implementation is available for this provider".to_string(),
                None,
                MailerError::NotRegistered(slug.to_string()),
                options,
            );
        };

        let descriptor_compatible = self
            .registry
            .get_options(slug)
            .map(|descriptor| self.registry.is_runtime_compatible(&descriptor))
            .unwrap_or(true);
        if !descriptor_compatible || !mailer.is_runtime_compatible() {
            return self.classify_failure(
                slug,
                format!(
                    "The mailer is not compatible with runtime version {}",
                    self.registry.runtime()
                ),
                None,
                MailerError::Incompatible(slug.to_string()),
                options,
            );
        }

        let send_result = mailer.send(&message).await;
        if send_result.is_ok() && mailer.is_email_sent() {
            return Ok(self.classify_sent(slug));
        }

        let trace = tracing_enabled.then(|| mailer.debug_info());
        let (detail, source) = match send_result {
            Err(e) => (
                mailer.response_error().unwrap_or_else(|| e.to_string()),
                e,
            ),
            Ok(()) => {
                let detail = mailer
                    .response_error()
                    .unwrap_or_else(|| "The provider did not confirm the message".to_string());
                (detail.clone(), MailerError::Rejected(detail))
            }
        };

        self.classify_failure(slug, detail, trace, source, options)
    }

    fn classify_sent(&self, slug: &str) -> DispatchResult {
        debug!("dispatch: classify (sent via {})", slug);
        // A successful send clears any stale failure
        self.diagnostics.clear();
        DispatchResult::Sent {
            mailer: slug.to_string(),
        }
    }

    fn classify_failure(
        &self,
        slug: &str,
        detail: String,
        trace: Option<String>,
        source: MailerError,
        options: DispatchOptions,
    ) -> DispatchOutcome {
        let mut error = format!("Mailer: {}\r\n", self.title_of(slug));
        let conflicts = self.conflicts.detect();
        if !conflicts.is_empty() {
            error.push_str(&format!("Conflicts: {}\r\n", conflicts.join(", ")));
        }
        error.push_str(&detail);

        let event = match &trace {
            Some(trace) if !trace.is_empty() => format!("{}\r\n\r\nTrace:\r\n{}", error, trace),
            _ => error.clone(),
        };
        let event_id = self.diagnostics.record_error(&event);
        warn!("dispatch: classify (soft failure via {}, event {})", slug, event_id);

        if options.exceptions {
            return Err(DispatchError {
                mailer: slug.to_string(),
                message: error,
                source,
            });
        }

        Ok(DispatchResult::SoftFailed {
            error,
            mailer: slug.to_string(),
        })
    }
}
