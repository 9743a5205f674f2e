//! In-app diagnostic channel. Failures that are not shown in the
//! conversation end up here and in the tracing output.

use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_LOG_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Info,
    Worker,
    Export,
    Error,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub text: String,
    pub kind: Kind,
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Ring {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, entry: Entry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn recent(&self, n: usize) -> Vec<Entry> {
        let len = self.entries.len();
        let take = n.min(len);
        self.entries.iter().skip(len - take).cloned().collect()
    }
}

static DIAGNOSTICS: Lazy<Mutex<Ring>> = Lazy::new(|| Mutex::new(Ring::new(MAX_LOG_LINES)));

pub fn record<T: Into<String>>(kind: Kind, line: T) {
    let text = line.into();
    match kind {
        Kind::Error => tracing::error!(target: "landmark_chat::diagnostics", "{}", text),
        _ => tracing::info!(target: "landmark_chat::diagnostics", ?kind, "{}", text),
    }
    if let Ok(mut ring) = DIAGNOSTICS.lock() {
        ring.push(Entry { text, kind });
    }
}

pub fn recent(n: usize) -> Vec<Entry> {
    DIAGNOSTICS.lock().map(|ring| ring.recent(n)).unwrap_or_default()
}

pub fn latest() -> Option<Entry> {
    DIAGNOSTICS.lock().ok().and_then(|ring| ring.entries.back().cloned())
}
