use super::{DebugEvent, DiagnosticsSink, EventId, EventKind};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Default number of events kept before the oldest are dropped
pub const DEFAULT_RETENTION: usize = 1_000;

#[derive(Debug, Default)]
struct State {
    events: VecDeque<DebugEvent>,
    latest_error: Option<String>,
    next_id: EventId,
}

/// In-process diagnostics log with bounded retention
#[derive(Debug)]
pub struct MemoryDiagnostics {
    state: Mutex<State>,
    retention: usize,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Keep at most `retention` events (at least one)
    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            retention: retention.max(1),
        }
    }

    fn push(&self, message: &str, kind: EventKind) -> EventId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if kind == EventKind::Error {
            state.latest_error = Some(message.to_string());
        }

        state.events.push_back(DebugEvent::new(id, message, kind));
        while state.events.len() > self.retention {
            state.events.pop_front();
        }

        id
    }
}

impl Default for MemoryDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn record_error(&self, message: &str) -> EventId {
        tracing::warn!("Dispatch error recorded: {}", message);
        self.push(message, EventKind::Error)
    }

    fn record_debug(&self, message: &str) -> EventId {
        tracing::debug!("Debug event recorded: {}", message);
        self.push(message, EventKind::Debug)
    }

    fn clear(&self) {
        self.state.lock().latest_error = None;
    }

    fn list(&self) -> Vec<DebugEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    fn latest_error(&self) -> Option<String> {
        self.state.lock().latest_error.clone()
    }

    fn last_event_id(&self) -> Option<EventId> {
        self.state.lock().events.back().map(|event| event.id)
    }
}
