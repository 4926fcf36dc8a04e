//! The event stream contract between the gateway and the chat client.
//!
//! Every frame carries an event name and a JSON object:
//!
//! ```text
//! event: message
//! data: {"event_loop_cycle_id": "c1", "message": "Hel"}
//!
//! event: tool
//! data: {"event_loop_cycle_id": "c1", "tool_name": "retrieve", "toolUseId": "t1", "tool_input": {"state": "in-progress"}}
//! ```
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

pub const MESSAGE_EVENT: &str = "message";
pub const TOOL_EVENT: &str = "tool";

/// The key inside `tool_input` that carries the lifecycle state.
pub const STATE_KEY: &str = "state";

/// One decoded frame of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

impl SseFrame {
    pub fn new<S: Into<String>>(event: S, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serialize the frame in its wire form, terminated by a blank line
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// One incremental text chunk for a generation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub event_loop_cycle_id: String,
    pub message: String,
}

/// A lifecycle update for a single tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolData {
    pub event_loop_cycle_id: String,
    pub tool_name: String,
    #[serde(rename = "toolUseId")]
    pub tool_use_id: String,
    #[serde(default = "in_progress_input")]
    pub tool_input: Value,
}

fn in_progress_input() -> Value {
    json!({ STATE_KEY: ToolState::InProgress.as_ref() })
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum ToolState {
    #[strum(serialize = "in-progress")]
    #[serde(rename = "in-progress")]
    InProgress,
    #[strum(serialize = "done")]
    #[serde(rename = "done")]
    Done,
    #[strum(serialize = "error")]
    #[serde(rename = "error")]
    Error,
    #[strum(serialize = "unknown")]
    #[serde(rename = "unknown")]
    Unknown,
}

impl ToolState {
    /// Derive the lifecycle state of a tool call from its input payload.
    ///
    /// A payload that is not a JSON object, and cannot be read as one, is still
    /// streaming and therefore in progress. A missing `state` key also means in
    /// progress; any state we do not recognize is `Unknown`.
    pub fn from_input(input: &Value) -> ToolState {
        match structured_input(input) {
            Some(map) => match map.get(STATE_KEY) {
                None => ToolState::InProgress,
                Some(Value::String(state)) => {
                    ToolState::from_str(state).unwrap_or(ToolState::Unknown)
                }
                Some(_) => ToolState::Unknown,
            },
            None => ToolState::InProgress,
        }
    }
}

/// Read a tool input as a JSON object, accepting a JSON-encoded string as well
pub fn structured_input(input: &Value) -> Option<Map<String, Value>> {
    match input {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// A classified event, ready to be folded into the conversation
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(MessageData),
    Tool(ToolData),
    Other(String),
}

impl TryFrom<SseFrame> for StreamEvent {
    type Error = serde_json::Error;

    fn try_from(frame: SseFrame) -> Result<Self, Self::Error> {
        match frame.event.as_str() {
            MESSAGE_EVENT => Ok(StreamEvent::Message(serde_json::from_value(frame.data)?)),
            TOOL_EVENT => Ok(StreamEvent::Tool(serde_json::from_value(frame.data)?)),
            _ => Ok(StreamEvent::Other(frame.event)),
        }
    }
}

impl From<MessageData> for SseFrame {
    fn from(data: MessageData) -> Self {
        SseFrame::new(MESSAGE_EVENT, json!(data))
    }
}

impl From<ToolData> for SseFrame {
    fn from(data: ToolData) -> Self {
        SseFrame::new(TOOL_EVENT, json!(data))
    }
}
