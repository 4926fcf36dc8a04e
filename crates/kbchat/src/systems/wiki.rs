use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

const DEFAULT_LIMIT: u32 = 5;
const MAX_LIMIT: u32 = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiConfig {
    /// e.g. https://example.atlassian.net
    pub host: String,
    pub username: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    excerpt: String,
    #[serde(default)]
    url: Option<String>,
}

/// Full-text search over a Confluence-style wiki
pub struct WikiSystem {
    tools: Vec<Tool>,
    client: Client,
    config: WikiConfig,
}

impl WikiSystem {
    pub fn new(config: WikiConfig) -> anyhow::Result<Self> {
        let search_tool = Tool::new(
            "wiki_search",
            "Search the team wiki for pages matching a query. \
            Returns page titles, links and short excerpts.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Words to search the wiki for."
                    },
                    "limit": {
                        "type": "integer",
                        "default": null,
                        "description": "Maximum number of pages to return."
                    }
                }
            }),
        );

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            tools: vec![search_tool],
            client,
            config,
        })
    }

    async fn search(&self, params: Value) -> AgentResult<Vec<Content>> {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AgentError::InvalidParameters("Missing 'query' parameter".into()))?;
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| (l as u32).clamp(1, MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let host = self.config.host.trim_end_matches('/');
        let url = format!("{}/wiki/rest/api/search", host);
        let cql = format!("text ~ \"{}\"", query.replace('"', "\\\""));
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .query(&[("cql", cql.as_str()), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Wiki request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::ExecutionError(format!(
                "Wiki returned {}: {}",
                status, body
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ExecutionError(format!("Invalid wiki response: {}", e)))?;

        if parsed.results.is_empty() {
            return Ok(vec![Content::text(format!("No wiki pages found for '{}'.", query))]);
        }

        Ok(parsed
            .results
            .into_iter()
            .map(|result| {
                let mut text = format!("# {}", result.title);
                if let Some(link) = result.url {
                    text.push_str(&format!("\n{}/wiki{}", host, link));
                }
                if !result.excerpt.is_empty() {
                    text.push_str(&format!("\n{}", result.excerpt));
                }
                Content::text(text)
            })
            .collect())
    }
}

#[async_trait]
impl System for WikiSystem {
    fn name(&self) -> &str {
        "WikiSystem"
    }

    fn description(&self) -> &str {
        "A system that searches the team wiki"
    }

    fn instructions(&self) -> &str {
        "Use wiki_search when the knowledge base does not cover a question \
        or when the user asks about internal pages."
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        match tool_call.name.as_str() {
            "wiki_search" => self.search(tool_call.arguments).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
