use async_trait::async_trait;

use crate::errors::AgentResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

pub mod knowledge_base;
pub mod wiki;

pub use knowledge_base::{KnowledgeBaseConfig, KnowledgeBaseSystem};
pub use wiki::{WikiConfig, WikiSystem};

/// A group of tools the agent can call, described to the model in the system
/// prompt
#[async_trait]
pub trait System: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Usage guidance rendered into the system prompt
    fn instructions(&self) -> &str;

    fn tools(&self) -> &[Tool];

    /// Run one of this system's tools
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}
