use super::{DebugEvent, DiagnosticsSink, EventId, EventKind};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

const EVENTS_FILE: &str = "debug_events.jsonl";
const LATEST_ERROR_FILE: &str = "latest_error.txt";

/// Durable diagnostics log stored as JSON lines in a directory
///
/// Write failures are logged and swallowed: diagnostics must never turn a
/// send into an error of its own.
#[derive(Debug)]
pub struct FileDiagnostics {
    dir: PathBuf,
    next_id: Mutex<EventId>,
}

impl FileDiagnostics {
    /// Open (or create) a diagnostics directory
    pub fn open<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let sink = Self {
            dir,
            next_id: Mutex::new(1),
        };
        let last = sink.read_events().last().map(|event| event.id).unwrap_or(0);
        *sink.next_id.lock() = last + 1;

        Ok(sink)
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    fn latest_error_path(&self) -> PathBuf {
        self.dir.join(LATEST_ERROR_FILE)
    }

    fn read_events(&self) -> Vec<DebugEvent> {
        let content = match fs::read_to_string(self.events_path()) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<DebugEvent>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Skipping unreadable debug event line: {}", e);
                    None
                }
            })
            .collect()
    }

    fn append(&self, message: &str, kind: EventKind) -> EventId {
        let mut next_id = self.next_id.lock();
        let event = DebugEvent::new(*next_id, message, kind);
        *next_id += 1;

        let write = || -> std::io::Result<()> {
            let line = serde_json::to_string(&event)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.events_path())?;
            writeln!(file, "{}", line)
        };

        if let Err(e) = write() {
            error!("Failed to append debug event to {}: {}", self.dir.display(), e);
        }

        event.id
    }
}

impl DiagnosticsSink for FileDiagnostics {
    fn record_error(&self, message: &str) -> EventId {
        if let Err(e) = fs::write(self.latest_error_path(), message) {
            error!("Failed to store latest error: {}", e);
        }
        self.append(message, EventKind::Error)
    }

    fn record_debug(&self, message: &str) -> EventId {
        self.append(message, EventKind::Debug)
    }

    fn clear(&self) {
        let path = self.latest_error_path();
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                error!("Failed to clear latest error: {}", e);
            }
        }
    }

    fn list(&self) -> Vec<DebugEvent> {
        self.read_events()
    }

    fn latest_error(&self) -> Option<String> {
        fs::read_to_string(self.latest_error_path())
            .ok()
            .filter(|message| !message.is_empty())
    }

    fn last_event_id(&self) -> Option<EventId> {
        let next = *self.next_id.lock();
        (next > 1).then(|| next - 1)
    }
}
