use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Unrecoverable failures of an event stream. Individual bad frames never
/// surface here; see [`FrameError`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("could not reach the agent: {0}")]
    Connect(String),

    #[error("agent responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connection lost while streaming: {0}")]
    Transport(String),
}

/// Why a single frame was dropped by the decoder.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame has no event name")]
    MissingEvent,

    #[error("frame has no data line")]
    MissingData,

    #[error("frame data is not valid JSON: {0}")]
    InvalidData(#[from] serde_json::Error),

    #[error("frame data is not a JSON object")]
    NotAnObject,

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}
