use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Call,
    Event,
}

/// One record in the [`EventLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: EntryKind,
    pub id: String,
    pub args: Vec<String>,
    /// Sequence number current when the entry was logged.
    pub seq: u32,
}

impl LogEntry {
    pub fn is_call(&self, id: &str) -> bool {
        self.kind == EntryKind::Call && self.id == id
    }

    pub fn is_event(&self, id: &str) -> bool {
        self.kind == EntryKind::Event && self.id == id
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EntryKind::Call => "call",
            EntryKind::Event => "event",
        };
        write!(f, "{kind} {}({}) #{}", self.id, self.args.join(", "), self.seq)
    }
}

/// Shared, append-only log of observed calls and events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn call(&self, id: &str, args: Vec<String>, seq: u32) {
        self.append(EntryKind::Call, id, args, seq);
    }

    pub fn event(&self, id: &str, args: Vec<String>, seq: u32) {
        self.append(EntryKind::Event, id, args, seq);
    }

    fn append(&self, kind: EntryKind, id: &str, args: Vec<String>, seq: u32) {
        self.entries().push(LogEntry {
            kind,
            id: id.to_string(),
            args,
            seq,
        });
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

impl fmt::Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries().iter() {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
