use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::{Content, TextContent};
use super::role::Role;
use super::tool::ToolCall;
use crate::errors::AgentResult;

/// A tool call the model asked for. The call itself is an error when the model
/// produced a bad name or unparsable arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: AgentResult<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub tool_result: AgentResult<Vec<Content>>,
}

/// One piece of a message in the session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    Text(TextContent),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        match self {
            MessageContent::ToolRequest(request) => Some(request),
            _ => None,
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        match self {
            MessageContent::ToolResponse(response) => Some(response),
            _ => None,
        }
    }
}

impl From<Content> for MessageContent {
    fn from(content: Content) -> Self {
        match content {
            Content::Text(text) => MessageContent::Text(text),
        }
    }
}

/// A message in a session's history, as exchanged with the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub created: DateTime<Utc>,
    pub content: Vec<MessageContent>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now(),
            content: Vec::new(),
        }
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    fn push(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.push(MessageContent::Text(TextContent { text: text.into() }))
    }

    pub fn with_tool_request<S: Into<String>>(self, id: S, tool_call: AgentResult<ToolCall>) -> Self {
        self.push(MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        }))
    }

    pub fn with_tool_response<S: Into<String>>(
        self,
        id: S,
        tool_result: AgentResult<Vec<Content>>,
    ) -> Self {
        self.push(MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            tool_result,
        }))
    }

    /// Concatenated text of every text content in the message
    pub fn text(&self) -> String {
        self.content.iter().filter_map(MessageContent::as_text).collect()
    }

    pub fn tool_requests(&self) -> Vec<&ToolRequest> {
        self.content
            .iter()
            .filter_map(MessageContent::as_tool_request)
            .collect()
    }

    /// A user message that carries tool results rather than something the
    /// user typed
    pub fn is_tool_response(&self) -> bool {
        self.content.iter().any(|c| c.as_tool_response().is_some())
    }
}
