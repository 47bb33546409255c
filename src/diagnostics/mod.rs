//! Diagnostics recorded by the dispatch pipeline
//!
//! The pipeline only ever writes here. Consumers (an admin screen, the CLI)
//! read the latest error and the event log to explain why a send failed.

pub mod file;
pub mod memory;

pub use file::FileDiagnostics;
pub use memory::MemoryDiagnostics;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a recorded event
pub type EventId = u64;

/// Kind of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A failed dispatch
    Error,
    /// Informational trace (blocked sends, bypassed settings, registry issues)
    Debug,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::Debug => "debug",
        }
    }
}

/// Append-only diagnostic record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub id: EventId,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub kind: EventKind,
}

impl DebugEvent {
    pub fn new(id: EventId, message: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            message: message.into(),
            kind,
        }
    }
}

/// Sink for dispatch diagnostics
pub trait DiagnosticsSink: Send + Sync {
    /// Record a failure: becomes the latest error and is appended as an error event
    fn record_error(&self, message: &str) -> EventId;

    /// Append an informational event
    fn record_debug(&self, message: &str) -> EventId;

    /// Forget the latest error, e.g. once sending recovers
    fn clear(&self);

    /// All retained events, oldest first
    fn list(&self) -> Vec<DebugEvent>;

    /// The most recent error message, if one is pending
    fn latest_error(&self) -> Option<String>;

    /// Identifier of the most recently recorded event
    fn last_event_id(&self) -> Option<EventId>;
}
