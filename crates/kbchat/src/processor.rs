//! Folds stream events into a turn's accumulation namespaces.
//!
//! Messages accumulate by cycle id, tool calls are replaced by tool-call id,
//! and the first sighting of every id is appended to the turn's ledger. No
//! rendering happens here.
use std::collections::hash_map::Entry;

use serde_json::Value;

use crate::conversation::{Clock, ToolCallRecord, TurnState};
use crate::ledger::EntryKind;
use crate::models::event::{structured_input, MessageData, SseFrame, StreamEvent, ToolData, ToolState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored,
}

/// Classify a decoded frame. Frames whose payload does not match their event
/// kind are logged and dropped.
pub fn classify(frame: SseFrame) -> Option<StreamEvent> {
    let event = frame.event.clone();
    match StreamEvent::try_from(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(event = %event, "Dropping event with unexpected payload: {}", e);
            None
        }
    }
}

pub fn apply(turn: &mut TurnState, clock: &mut Clock, event: StreamEvent) -> Outcome {
    match event {
        StreamEvent::Message(data) => {
            apply_message(turn, clock, data);
            Outcome::Applied
        }
        StreamEvent::Tool(data) => {
            apply_tool(turn, clock, data);
            Outcome::Applied
        }
        StreamEvent::Other(kind) => {
            tracing::warn!("Ignoring unknown event type: {}", kind);
            Outcome::Ignored
        }
    }
}

fn apply_message(turn: &mut TurnState, clock: &mut Clock, data: MessageData) {
    let buffer = match turn.messages.entry(data.event_loop_cycle_id) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            turn.ledger
                .record(EntryKind::Message, entry.key(), clock.tick());
            entry.insert(String::new())
        }
    };
    buffer.push_str(&data.message);
}

fn apply_tool(turn: &mut TurnState, clock: &mut Clock, data: ToolData) {
    // The slot is claimed on first sight, before the record exists
    if !turn.tools.contains_key(&data.tool_use_id) {
        turn.ledger
            .record(EntryKind::Tool, &data.tool_use_id, clock.tick());
    }

    let state = ToolState::from_input(&data.tool_input);
    let input = structured_input(&data.tool_input)
        .map(Value::Object)
        .unwrap_or(data.tool_input);

    turn.tools.insert(
        data.tool_use_id.clone(),
        ToolCallRecord {
            cycle_id: data.event_loop_cycle_id,
            tool_name: data.tool_name,
            tool_use_id: data.tool_use_id,
            state,
            input,
        },
    );
}
