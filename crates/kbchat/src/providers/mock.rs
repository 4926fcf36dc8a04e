use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{DeltaStream, Provider, ProviderDelta};

/// A mock provider that streams pre-configured responses for testing.
/// Each response is the list of deltas of one model round.
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Vec<ProviderDelta>>>>,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<Vec<ProviderDelta>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The message histories the provider was called with, in order
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<DeltaStream> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        // An exhausted script answers with an empty round
        let deltas = if responses.is_empty() {
            Vec::new()
        } else {
            responses.remove(0)
        };
        Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
    }
}
