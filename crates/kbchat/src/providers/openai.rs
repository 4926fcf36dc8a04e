use anyhow::{anyhow, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{DeltaStream, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{messages_to_openai_spec, parse_stream_chunk, tools_to_openai_spec};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// Streams chat completions from any OpenAI compatible endpoint
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": system
        })];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(messages_array));
        payload.insert("stream".to_string(), json!(true));

        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
        }
        if let Some(temp) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }

        Ok(Value::Object(payload))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<DeltaStream> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        let payload = self.payload(system, messages, tools)?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header(ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                return Err(anyhow!("Server error: {}", status));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!("Request failed: {}\n{}", status, body));
            }
        }

        let mut events = response.bytes_stream().eventsource();
        let stream = async_stream::try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| anyhow!("Stream error: {}", e))?;
                // OpenAI Chat streaming sends a literal "[DONE]" when finished
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let chunk: Value = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!("Skipping unparsable completion chunk: {}", e);
                        continue;
                    }
                };
                for delta in parse_stream_chunk(&chunk)? {
                    yield delta;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
