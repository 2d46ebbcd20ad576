//! In-memory ring buffer of recent telemetry payloads.
//!
//! The store is an owned value (held by the handler context) rather than
//! process-wide state; all access happens on the reactor thread so no
//! locking is involved.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;

/// Entries retained before the oldest is evicted.
pub const MAX_ENTRIES: usize = 100;
/// Per-entry size cap in bytes.
pub const MAX_ENTRY_SIZE: usize = 512;

/// Rejection reasons for [`TelemetryStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    Empty,
    TooLarge,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StoreError::Empty => "empty telemetry payload",
            StoreError::TooLarge => "telemetry payload over size cap",
        };
        write!(f, "{}", s)
    }
}

impl Error for StoreError {}

/// One stored payload with its receive timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEntry {
    pub json: String,
    pub timestamp_ms: u64,
}

/// Counters exposed by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryStats {
    pub total_received: u64,
    pub current_count: usize,
    pub capacity: usize,
    pub last_received_ms: u64,
}

/// Fixed-capacity ring of telemetry JSON documents, oldest first.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    entries: VecDeque<TelemetryEntry>,
    total_received: u64,
    last_received_ms: u64,
}

impl TelemetryStore {
    pub fn new() -> Self {
        TelemetryStore {
            entries: VecDeque::with_capacity(MAX_ENTRIES),
            total_received: 0,
            last_received_ms: 0,
        }
    }

    /// Appends a document, evicting the oldest entry once the ring is full.
    pub fn add(&mut self, json: &str, now_ms: u64) -> Result<(), StoreError> {
        if json.is_empty() {
            return Err(StoreError::Empty);
        }
        if json.len() > MAX_ENTRY_SIZE {
            return Err(StoreError::TooLarge);
        }
        if self.entries.len() == MAX_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(TelemetryEntry {
            json: json.to_string(),
            timestamp_ms: now_ms,
        });
        self.total_received += 1;
        self.last_received_ms = now_ms;
        Ok(())
    }

    /// Stored entries in chronological order (oldest → newest).
    pub fn entries(&self) -> impl Iterator<Item = &TelemetryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_received = 0;
        self.last_received_ms = 0;
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            total_received: self.total_received,
            current_count: self.entries.len(),
            capacity: MAX_ENTRIES,
            last_received_ms: self.last_received_ms,
        }
    }

    /// Serializes stored entries as a JSON array of
    /// `{"data":<document>,"timestamp":<ms>}` objects, chronological order.
    ///
    /// When the full array would exceed `max_bytes`, the oldest entries are
    /// omitted so the most recent ones fit the budget.
    pub fn serialize(&self, max_bytes: usize) -> String {
        let mut rendered: Vec<String> = Vec::new();
        // brackets
        let mut used = 2;
        for entry in self.entries.iter().rev() {
            let obj = format!(
                "{{\"data\":{},\"timestamp\":{}}}",
                entry.json, entry.timestamp_ms
            );
            let sep = usize::from(!rendered.is_empty());
            if used + obj.len() + sep > max_bytes {
                break;
            }
            used += obj.len() + sep;
            rendered.push(obj);
        }
        rendered.reverse();
        format!("[{}]", rendered.join(","))
    }
}
