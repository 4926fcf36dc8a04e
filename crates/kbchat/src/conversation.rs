//! Session-scoped conversation state.
//!
//! A [`ConversationState`] lives for the whole chat session and owns
//! everything the renderer needs: the log of user-side entries, one
//! [`TurnState`] per submitted query, the connection status and the clock that
//! stamps every entry. It is cleared only by an explicit [`ConversationState::reset`].
use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display as StrumDisplay;

use crate::ledger::FlowLedger;
use crate::models::event::{SseFrame, StreamEvent, ToolState};
use crate::processor::{self, Outcome};

pub const LOADING_TEXT: &str = "Invoking agent...";

/// A point on the conversation timeline.
///
/// Ordering is by sequence number, which one [`Clock`] hands out strictly
/// increasing, so two timestamps never tie even when the wall clock does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp {
    pub seq: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Clock {
    next: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) -> Timestamp {
        let seq = self.next;
        self.next += 1;
        Timestamp { seq, at: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum LogKind {
    User,
    Loading,
    Error,
}

/// An entry that does not come from the agent stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub content: String,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub cycle_id: String,
    pub tool_name: String,
    pub tool_use_id: String,
    pub state: ToolState,
    pub input: Value,
}

/// The accumulation namespaces of one turn: text by cycle id, tool calls by
/// tool-call id, and the ledger of first appearances.
#[derive(Debug, Default, Clone)]
pub struct TurnState {
    pub(crate) messages: HashMap<String, String>,
    pub(crate) tools: HashMap<String, ToolCallRecord>,
    pub(crate) ledger: FlowLedger,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, cycle_id: &str) -> Option<&str> {
        self.messages.get(cycle_id).map(String::as_str)
    }

    pub fn tool(&self, tool_use_id: &str) -> Option<&ToolCallRecord> {
        self.tools.get(tool_use_id)
    }

    pub fn ledger(&self) -> &FlowLedger {
        &self.ledger
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    clock: Clock,
    log: Vec<LogEntry>,
    turns: Vec<TurnState>,
    status: ConnectionStatus,
    last_error: Option<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            log: Vec::new(),
            turns: Vec::new(),
            status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    /// Start a new turn: log the user's text, show the loading placeholder and
    /// open fresh accumulators.
    pub fn submit(&mut self, query: &str) {
        self.remove_loading();
        self.push_log(LogKind::User, query);
        self.push_log(LogKind::Loading, LOADING_TEXT);
        self.turns.push(TurnState::new());
        self.status = ConnectionStatus::Connecting;
    }

    /// Fold one classified event into the current turn
    pub fn apply(&mut self, event: StreamEvent) -> Outcome {
        if self.turns.is_empty() {
            self.turns.push(TurnState::new());
        }
        match self.turns.last_mut() {
            Some(turn) => processor::apply(turn, &mut self.clock, event),
            None => Outcome::Ignored,
        }
    }

    /// Classify a decoded frame and fold it into the current turn
    pub fn apply_frame(&mut self, frame: SseFrame) -> Outcome {
        match processor::classify(frame) {
            Some(event) => self.apply(event),
            None => Outcome::Ignored,
        }
    }

    /// Remove the live loading placeholder. Returns false if there was none.
    pub fn remove_loading(&mut self) -> bool {
        match self.log.iter().rposition(|e| e.kind == LogKind::Loading) {
            Some(index) => {
                self.log.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn has_loading(&self) -> bool {
        self.log.iter().any(|e| e.kind == LogKind::Loading)
    }

    /// Record a failed turn as a readable error entry
    pub fn fail(&mut self, reason: impl Display) {
        let reason = reason.to_string();
        self.remove_loading();
        self.push_log(
            LogKind::Error,
            &format!("Failed to connect to agent: {}", reason),
        );
        self.status = ConnectionStatus::Error;
        self.last_error = Some(reason);
    }

    pub fn complete(&mut self) {
        self.status = ConnectionStatus::Connected;
    }

    /// Stop following the current turn. Whatever was accumulated stays as it is.
    pub fn abandon(&mut self) {
        self.remove_loading();
        self.status = ConnectionStatus::Disconnected;
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn turns(&self) -> &[TurnState] {
        &self.turns
    }

    pub fn current_turn(&self) -> Option<&TurnState> {
        self.turns.last()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn push_log(&mut self, kind: LogKind, content: &str) {
        let at = self.clock.tick();
        self.log.push(LogEntry {
            kind,
            content: content.to_string(),
            at,
        });
    }
}
