use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

pub const DEFAULT_NUMBER_OF_RESULTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Base URL of the retrieval service
    pub endpoint: String,
    pub knowledge_base_id: String,
    /// Sent as a bearer token when present
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_number_of_results")]
    pub number_of_results: u32,
    /// Results scoring below this are dropped
    #[serde(default)]
    pub min_score: Option<f64>,
}

fn default_number_of_results() -> u32 {
    DEFAULT_NUMBER_OF_RESULTS
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RetrievalResult>,
}

#[derive(Debug, Deserialize)]
struct RetrievalResult {
    content: RetrievalContent,
    #[serde(default)]
    location: Option<Value>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RetrievalContent {
    text: String,
}

/// Answers questions from a vector-searchable knowledge base
pub struct KnowledgeBaseSystem {
    tools: Vec<Tool>,
    client: Client,
    config: KnowledgeBaseConfig,
}

impl KnowledgeBaseSystem {
    pub fn new(config: KnowledgeBaseConfig) -> anyhow::Result<Self> {
        let retrieve_tool = Tool::new(
            "retrieve",
            "Retrieve passages relevant to a question from the knowledge base. \
            Use this before answering anything about the organisation's products, \
            services or internal documentation.",
            json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The question or search phrase to look up."
                    },
                    "numberOfResults": {
                        "type": "integer",
                        "default": null,
                        "description": "Maximum number of passages to return."
                    }
                }
            }),
        );

        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            tools: vec![retrieve_tool],
            client,
            config,
        })
    }

    async fn retrieve(&self, params: Value) -> AgentResult<Vec<Content>> {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'text' parameter".into()))?;
        let number_of_results = match params.get("numberOfResults") {
            None | Some(Value::Null) => self.config.number_of_results,
            Some(value) => value
                .as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    AgentError::InvalidParameters(
                        "'numberOfResults' must be a positive integer".into(),
                    )
                })?,
        };

        let url = format!(
            "{}/knowledgebases/{}/retrieve",
            self.config.endpoint.trim_end_matches('/'),
            self.config.knowledge_base_id
        );
        let body = json!({
            "retrievalQuery": {"text": text},
            "retrievalConfiguration": {
                "vectorSearchConfiguration": {"numberOfResults": number_of_results}
            }
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        tracing::info!(knowledge_base = %self.config.knowledge_base_id, "Retrieving: {}", text);
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Retrieve request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::ExecutionError(format!(
                "Knowledge base returned {}: {}",
                status, body
            )));
        }

        let parsed: RetrieveResponse = response.json().await.map_err(|e| {
            AgentError::ExecutionError(format!("Invalid knowledge base response: {}", e))
        })?;

        Ok(self.format_results(parsed.retrieval_results))
    }

    fn format_results(&self, results: Vec<RetrievalResult>) -> Vec<Content> {
        let kept: Vec<_> = results
            .into_iter()
            .filter(|r| match (self.config.min_score, r.score) {
                (Some(min), Some(score)) => score >= min,
                _ => true,
            })
            .collect();

        if kept.is_empty() {
            return vec![Content::text("No relevant results found.")];
        }

        kept.iter()
            .enumerate()
            .map(|(i, result)| {
                let mut header = format!("Result {}", i + 1);
                if let Some(score) = result.score {
                    header.push_str(&format!(" (score: {:.4})", score));
                }
                if let Some(source) = result.location.as_ref().and_then(source_of) {
                    header.push_str(&format!("\nSource: {}", source));
                }
                Content::text(format!("{}\n{}", header, result.content.text))
            })
            .collect()
    }
}

/// The most specific human readable pointer a location carries
fn source_of(location: &Value) -> Option<String> {
    ["/s3Location/uri", "/webLocation/url", "/confluenceLocation/url", "/customDocumentLocation/id"]
        .iter()
        .find_map(|pointer| location.pointer(pointer).and_then(Value::as_str))
        .map(String::from)
}

#[async_trait]
impl System for KnowledgeBaseSystem {
    fn name(&self) -> &str {
        "KnowledgeBaseSystem"
    }

    fn description(&self) -> &str {
        "A system that retrieves passages from the organisation's knowledge base"
    }

    fn instructions(&self) -> &str {
        "Use the retrieve tool to ground every answer in the knowledge base. \
        Cite the sources of the passages you rely on."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            "retrieve" => self.retrieve(tool_call.arguments).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
