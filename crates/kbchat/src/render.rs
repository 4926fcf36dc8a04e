//! Chronological merge of the conversation into a render list.
//!
//! [`render`] is a pure function of the [`ConversationState`]: calling it twice
//! on the same state yields the same list. Drawing that list is the job of a
//! [`View`].
use serde::Serialize;
use serde_json::Value;

use crate::conversation::{ConnectionStatus, ConversationState, LogKind, Timestamp, ToolCallRecord};
use crate::ledger::EntryKind;
use crate::models::event::{ToolState, STATE_KEY};

pub const DEFAULT_TOOL_ICON: &str = "🔧";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolView {
    pub icon: &'static str,
    pub name: String,
    pub tool_use_id: String,
    pub state: ToolState,
    pub indicator: &'static str,
    /// The tool input without its state key, present only once the call is done
    pub details: Option<Value>,
}

impl From<&ToolCallRecord> for ToolView {
    fn from(record: &ToolCallRecord) -> Self {
        ToolView {
            icon: tool_icon(&record.tool_name),
            name: record.tool_name.clone(),
            tool_use_id: record.tool_use_id.clone(),
            state: record.state,
            indicator: state_indicator(record.state),
            details: tool_details(record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderItem {
    User { content: String },
    Loading { content: String },
    Error { content: String },
    AgentMessage { cycle_id: String, content: String },
    Tool(ToolView),
}

/// Something that can draw a render list, from scratch, every time it is asked
pub trait View {
    fn draw(&mut self, items: &[RenderItem]);

    /// Called before each draw with the connection status and last error
    fn status(&mut self, _status: ConnectionStatus, _last_error: Option<&str>) {}
}

/// Hand a view the state's status, then its render list
pub fn redraw<V: View + ?Sized>(view: &mut V, state: &ConversationState) {
    view.status(state.status(), state.last_error());
    view.draw(&render(state));
}

pub fn tool_icon(tool_name: &str) -> &'static str {
    match tool_name {
        "retrieve" => "🔍",
        "wiki_search" => "📚",
        _ => DEFAULT_TOOL_ICON,
    }
}

pub fn state_indicator(state: ToolState) -> &'static str {
    match state {
        ToolState::InProgress => "⏳ In Progress...",
        ToolState::Done => "✅ Done",
        ToolState::Error => "❌ Error",
        ToolState::Unknown => "❓ Unknown",
    }
}

/// The input of a finished tool call with the internal state key removed.
/// Returns None while the call is running, or when nothing else is left.
pub fn tool_details(record: &ToolCallRecord) -> Option<Value> {
    if record.state != ToolState::Done {
        return None;
    }
    let mut map = record.input.as_object()?.clone();
    map.remove(STATE_KEY);
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// Merge the conversation log and every turn's ledger into one list ordered
/// by timestamp. The sort is stable.
pub fn render(state: &ConversationState) -> Vec<RenderItem> {
    let mut timeline: Vec<(Timestamp, RenderItem)> = Vec::new();

    for entry in state.log() {
        let content = entry.content.clone();
        let item = match entry.kind {
            LogKind::User => RenderItem::User { content },
            LogKind::Loading => RenderItem::Loading { content },
            LogKind::Error => RenderItem::Error { content },
        };
        timeline.push((entry.at, item));
    }

    for turn in state.turns() {
        for entry in turn.ledger().snapshot() {
            match entry.kind {
                EntryKind::Message => {
                    let Some(text) = turn.message(&entry.id) else {
                        continue;
                    };
                    // a cycle that only produced tool calls has nothing to show
                    if text.trim().is_empty() {
                        continue;
                    }
                    timeline.push((
                        entry.first_seen,
                        RenderItem::AgentMessage {
                            cycle_id: entry.id.clone(),
                            content: text.to_string(),
                        },
                    ));
                }
                EntryKind::Tool => {
                    if let Some(record) = turn.tool(&entry.id) {
                        timeline.push((entry.first_seen, RenderItem::Tool(record.into())));
                    }
                }
            }
        }
    }

    timeline.sort_by_key(|(at, _)| *at);
    timeline.into_iter().map(|(_, item)| item).collect()
}
