use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::message::Message;
use crate::models::tool::Tool;

/// An incremental piece of a model response
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderDelta {
    /// A fragment of the assistant's text
    Text(String),
    /// A fragment of a tool call. `index` identifies the call within the
    /// response; id and name usually arrive only with the first fragment.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = BoxStream<'static, Result<ProviderDelta>>;

/// Base trait for AI providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream the next assistant response for the conversation so far
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<DeltaStream>;
}
