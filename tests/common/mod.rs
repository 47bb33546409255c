//! Shared fixtures: transports and mailers that record instead of sending

#![allow(dead_code)]

use async_trait::async_trait;
use lettre::Message;
use mailgate::config::{ConfigResolver, EnvironmentOverrides, MemoryStore, OptionTree};
use mailgate::connection::{Connection, ConnectionManager};
use mailgate::diagnostics::{DiagnosticsSink, MemoryDiagnostics};
use mailgate::dispatch::DispatchGate;
use mailgate::mailer::{Mailer, MailerError, MailerRegistry, MailerResult};
use mailgate::message::OutboundMessage;
use mailgate::site::SiteContext;
use mailgate::transport::{
    SmtpParameters, Transport, TransportError, TransportFactory, TransportResult, TransportTrace,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A message as it reached a stub transport
#[derive(Debug, Clone)]
pub struct Delivered {
    pub transport: &'static str,
    pub envelope_from: Option<String>,
    pub recipients: Vec<String>,
    pub formatted: String,
}

/// Transport factory whose transports record deliveries
#[derive(Default)]
pub struct StubTransports {
    pub builtin_calls: AtomicUsize,
    pub smtp_calls: Mutex<Vec<SmtpParameters>>,
    pub delivered: Arc<Mutex<Vec<Delivered>>>,
    /// When set, every delivery fails with this server response
    pub fail_with: Option<String>,
}

impl StubTransports {
    pub fn failing(response: &str) -> Self {
        Self {
            fail_with: Some(response.to_string()),
            ..Self::default()
        }
    }

    pub fn builtin_calls(&self) -> usize {
        self.builtin_calls.load(Ordering::SeqCst)
    }

    pub fn smtp_calls(&self) -> usize {
        self.smtp_calls.lock().len()
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }

    fn transport(&self, name: &'static str) -> Box<dyn Transport> {
        Box::new(StubTransport {
            name,
            delivered: self.delivered.clone(),
            fail_with: self.fail_with.clone(),
        })
    }
}

impl TransportFactory for StubTransports {
    fn builtin(&self) -> TransportResult<Box<dyn Transport>> {
        self.builtin_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport("builtin"))
    }

    fn smtp(&self, params: &SmtpParameters) -> TransportResult<Box<dyn Transport>> {
        self.smtp_calls.lock().push(params.clone());
        Ok(self.transport("smtp"))
    }
}

struct StubTransport {
    name: &'static str,
    delivered: Arc<Mutex<Vec<Delivered>>>,
    fail_with: Option<String>,
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &str {
        self.name
    }

    async fn deliver(&self, message: &Message, trace: &mut TransportTrace) -> TransportResult<()> {
        trace.record(format!("stub {}: connected", self.name));

        if let Some(response) = &self.fail_with {
            trace.record(format!("stub {}: {}", self.name, response));
            return Err(TransportError::Rejected(response.clone()));
        }

        self.delivered.lock().push(Delivered {
            transport: self.name,
            envelope_from: message.envelope().from().map(ToString::to_string),
            recipients: message.envelope().to().iter().map(ToString::to_string).collect(),
            formatted: String::from_utf8_lossy(&message.formatted()).into_owned(),
        });
        trace.record(format!("stub {}: 250 OK", self.name));
        Ok(())
    }
}

/// How a [`StubMailer`] behaves when asked to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    Accept,
    /// Returns Ok but never confirms the message
    Unconfirmed,
    Reject,
}

/// Provider mailer counting its sends and keeping what it was given
#[derive(Clone)]
pub struct StubMailer {
    pub calls: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<OutboundMessage>>>,
    behavior: StubBehavior,
    sent: bool,
}

impl StubMailer {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
            behavior,
            sent: false,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<OutboundMessage> {
        self.received.lock().clone()
    }

    /// Register a factory for `slug` that hands out clones of this stub
    pub fn register(&self, registry: &mut MailerRegistry, slug: &str) {
        let template = self.clone();
        let registered = registry.register_mailer(
            slug,
            Arc::new(move |_connection: &Connection| -> MailerResult<Box<dyn Mailer>> {
                Ok(Box::new(template.clone()))
            }),
        );
        assert!(registered, "slug {} is not in the registry", slug);
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&mut self, message: &OutboundMessage) -> MailerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(message.clone());

        match self.behavior {
            StubBehavior::Accept => {
                self.sent = true;
                Ok(())
            }
            StubBehavior::Unconfirmed => Ok(()),
            StubBehavior::Reject => Err(MailerError::Rejected("Invalid API key".to_string())),
        }
    }

    fn is_email_sent(&self) -> bool {
        self.sent
    }

    fn is_mailer_complete(&self) -> bool {
        true
    }

    fn response_error(&self) -> Option<String> {
        match self.behavior {
            StubBehavior::Accept => None,
            StubBehavior::Unconfirmed => Some("Queue full".to_string()),
            StubBehavior::Reject => Some("401 Invalid API key".to_string()),
        }
    }

    fn debug_info(&self) -> String {
        "Stub mailer\r\nEndpoint: https://api.invalid/send".to_string()
    }
}

pub fn tree(value: Value) -> OptionTree {
    match value {
        Value::Object(tree) => tree,
        other => panic!("expected an object, got {}", other),
    }
}

/// Primary options in memory with the given values stored
pub fn options(values: Value) -> ConfigResolver {
    let options = ConfigResolver::new(
        Arc::new(MemoryStore::new()),
        "primary",
        EnvironmentOverrides::disabled(),
        None,
    )
    .unwrap();
    options.set(tree(values), false, false).unwrap();
    options
}

pub fn site() -> SiteContext {
    SiteContext::parse("https://example.com", "Example Shop").unwrap()
}

/// What the host would hand over: default sender, one recipient
pub fn message() -> OutboundMessage {
    OutboundMessage::new()
        .from_str("wordpress@example.com")
        .unwrap()
        .to_str("customer@example.org")
        .unwrap()
        .subject("Your order")
        .text("Thanks for your order.")
}

/// A gate over stub transports with in-memory diagnostics
pub struct Harness {
    pub gate: DispatchGate,
    pub transports: Arc<StubTransports>,
    pub diagnostics: Arc<MemoryDiagnostics>,
}

pub fn harness(values: Value) -> Harness {
    harness_with(values, StubTransports::default(), |_| {})
}

pub fn harness_with<F>(values: Value, transports: StubTransports, configure: F) -> Harness
where
    F: FnOnce(&mut MailerRegistry),
{
    let transports = Arc::new(transports);
    let diagnostics = Arc::new(MemoryDiagnostics::new());
    let sink: Arc<dyn DiagnosticsSink> = diagnostics.clone();
    let factory: Arc<dyn TransportFactory> = transports.clone();

    let mut registry = MailerRegistry::with_transports(sink.clone(), factory.clone());
    configure(&mut registry);

    let connections = ConnectionManager::new(Connection::primary(options(values)));
    let gate = DispatchGate::new(connections, Arc::new(registry), factory, sink, site());

    Harness {
        gate,
        transports,
        diagnostics,
    }
}
