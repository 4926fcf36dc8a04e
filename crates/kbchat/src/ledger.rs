//! The conversation flow ledger.
//!
//! Records the order in which distinct message cycles and tool calls were
//! first seen. Once an id claims a slot, later updates to it change its
//! content in place, never its position.
use std::collections::HashSet;

use serde::Serialize;
use strum_macros::Display;

use crate::conversation::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Message,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub kind: EntryKind,
    pub id: String,
    pub first_seen: Timestamp,
}

#[derive(Debug, Default, Clone)]
pub struct FlowLedger {
    entries: Vec<LedgerEntry>,
    seen: HashSet<(EntryKind, String)>,
}

impl FlowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry for `id` unless one already exists.
    ///
    /// Returns true when the entry was appended.
    pub fn record(&mut self, kind: EntryKind, id: &str, first_seen: Timestamp) -> bool {
        if !self.seen.insert((kind, id.to_string())) {
            return false;
        }
        self.entries.push(LedgerEntry {
            kind,
            id: id.to_string(),
            first_seen,
        });
        true
    }

    pub fn contains(&self, kind: EntryKind, id: &str) -> bool {
        self.seen.contains(&(kind, id.to_string()))
    }

    /// The slot claimed by `id`, if any
    pub fn position(&self, kind: EntryKind, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.kind == kind && entry.id == id)
    }

    /// Entries appended at or after position `n`
    pub fn since(&self, n: usize) -> &[LedgerEntry] {
        self.entries.get(n..).unwrap_or(&[])
    }

    pub fn snapshot(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
