//! Dispatch failures recorded in the durable diagnostics log

mod common;

use common::{message, options, site, StubTransports};
use mailgate::connection::{Connection, ConnectionManager};
use mailgate::diagnostics::{DiagnosticsSink, EventKind, FileDiagnostics};
use mailgate::dispatch::{DispatchGate, DispatchOptions, DispatchResult};
use mailgate::mailer::MailerRegistry;
use mailgate::transport::TransportFactory;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn gate(dir: &Path, transports: StubTransports) -> DispatchGate {
    let sink: Arc<dyn DiagnosticsSink> = Arc::new(FileDiagnostics::open(dir).unwrap());
    let factory: Arc<dyn TransportFactory> = Arc::new(transports);
    let registry = MailerRegistry::with_transports(sink.clone(), factory.clone());

    let connection = Connection::primary(options(json!({
        "mail": {"mailer": "smtp", "from_email": "shop@example.com"},
        "smtp": {"host": "smtp.example.com", "port": 587}
    })));

    DispatchGate::new(
        ConnectionManager::new(connection),
        Arc::new(registry),
        factory,
        sink,
        site(),
    )
}

#[test]
fn test_failure_survives_restart_until_a_send_succeeds() {
    let temp_dir = tempdir().unwrap();

    let failing = gate(temp_dir.path(), StubTransports::failing("535 authentication failed"));
    let result = tokio_test::block_on(failing.dispatch(message(), DispatchOptions::default())).unwrap();
    assert!(matches!(result, DispatchResult::SoftFailed { .. }));

    let reopened = FileDiagnostics::open(temp_dir.path()).unwrap();
    let latest = reopened.latest_error().unwrap();
    assert!(latest.starts_with("Mailer: Other SMTP\r\n"));
    assert!(latest.contains("535 authentication failed"));

    let events = reopened.list();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Error);
    assert_eq!(reopened.last_event_id(), Some(events[0].id));

    let working = gate(temp_dir.path(), StubTransports::default());
    let result = tokio_test::block_on(working.dispatch(message(), DispatchOptions::default())).unwrap();
    assert_eq!(result, DispatchResult::Sent { mailer: "smtp".to_string() });

    let reopened = FileDiagnostics::open(temp_dir.path()).unwrap();
    assert!(reopened.latest_error().is_none());
    // The event log itself is history and is kept
    assert_eq!(reopened.list().len(), 1);
}
