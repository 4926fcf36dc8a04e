use anyhow::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::load_system_prompt;
use crate::providers::base::{Provider, ProviderDelta};
use crate::providers::utils::is_valid_function_name;
use crate::systems::System;

pub const DEFAULT_MAX_CYCLES: usize = 10;
pub const DEFAULT_HISTORY_WINDOW: usize = 30;

/// A tool call as seen so far. `input` is the raw argument text, which is not
/// valid JSON until the model has finished writing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub tool_use_id: String,
    pub name: String,
    pub input: String,
}

/// What a reply produces, in order
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A text fragment of the assistant's answer
    Text { cycle_id: String, text: String },
    /// The latest state of a tool call being written or about to run
    ToolUse { cycle_id: String, tool_use: ToolUse },
    /// A dispatched tool call that returned an error
    ToolFailed {
        cycle_id: String,
        tool_use: ToolUse,
        error: AgentError,
    },
    /// A completed message to append to the conversation history
    Message(Message),
}

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
    tools: Vec<String>,
}

impl SystemInfo {
    fn from_system(system: &dyn System) -> Self {
        Self {
            name: system.name().to_string(),
            description: system.description().to_string(),
            instructions: system.instructions().to_string(),
            tools: system.tools().iter().map(|t| t.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn tool_use(&self) -> ToolUse {
        ToolUse {
            tool_use_id: self.id.clone(),
            name: self.name.clone(),
            input: self.arguments.clone(),
        }
    }

    /// The call with empty arguments read as an empty object
    fn finished(&self) -> ToolUse {
        let mut tool_use = self.tool_use();
        if tool_use.input.trim().is_empty() {
            tool_use.input = "{}".to_string();
        }
        tool_use
    }
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Box<dyn Provider>,
    max_cycles: usize,
    prompt_file: Option<PathBuf>,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
            max_cycles: DEFAULT_MAX_CYCLES,
            prompt_file: None,
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: usize) -> Self {
        self.max_cycles = max_cycles.max(1);
        self
    }

    /// Use a system prompt template from disk instead of the bundled one
    pub fn with_prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompt_file = Some(path.into());
        self
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
    }

    pub fn systems(&self) -> impl Iterator<Item = &dyn System> {
        self.systems.iter().map(|s| &**s)
    }

    pub fn get_tools(&self) -> Vec<Tool> {
        self.systems
            .iter()
            .flat_map(|system| system.tools().iter().cloned())
            .collect()
    }

    fn get_system_for_tool(&self, tool_name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|system| system.tools().iter().any(|t| t.name == tool_name))
            .map(|v| &**v)
    }

    /// Dispatch a single tool call to the system that owns the tool
    async fn dispatch_tool_call(
        &self,
        tool_call: AgentResult<ToolCall>,
    ) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        let system = self
            .get_system_for_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        tracing::info!(system = system.name(), tool = %call.name, "Dispatching tool call");
        system.call(call).await
    }

    pub fn get_system_prompt(&self) -> AgentResult<String> {
        let mut context = HashMap::new();
        let systems_info: Vec<SystemInfo> = self
            .systems
            .iter()
            .map(|system| SystemInfo::from_system(system.as_ref()))
            .collect();

        context.insert("systems", systems_info);
        load_system_prompt(self.prompt_file.as_deref(), &context)
            .map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Stream the agent's reply to the conversation so far.
    ///
    /// Each model round is one event-loop cycle with its own id. A round that
    /// requests tools is followed by the tool responses and another round; the
    /// loop ends on a round without tool calls or after `max_cycles` rounds.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<AgentEvent>>> {
        let mut messages = messages.to_vec();
        let tools = self.get_tools();
        let system_prompt = self.get_system_prompt()?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut cycles = 0;
            loop {
                if cycles == self.max_cycles {
                    tracing::warn!("Reached the limit of {} cycles, ending reply", self.max_cycles);
                    break;
                }
                cycles += 1;

                let cycle_id = Uuid::new_v4().to_string();
                let mut deltas = self.provider.stream(&system_prompt, &messages, &tools).await?;
                let mut text = String::new();
                let mut calls: BTreeMap<usize, PendingCall> = BTreeMap::new();

                while let Some(delta) = deltas.next().await {
                    match delta? {
                        ProviderDelta::Text(fragment) => {
                            text.push_str(&fragment);
                            yield AgentEvent::Text {
                                cycle_id: cycle_id.clone(),
                                text: fragment,
                            };
                        }
                        ProviderDelta::ToolCall { index, id, name, arguments } => {
                            let call = calls.entry(index).or_default();
                            // The first id a call gets is the one clients see
                            if call.id.is_empty() {
                                call.id = id
                                    .filter(|id| !id.is_empty())
                                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                            }
                            if let Some(name) = name {
                                call.name = name;
                            }
                            call.arguments.push_str(&arguments);
                            yield AgentEvent::ToolUse {
                                cycle_id: cycle_id.clone(),
                                tool_use: call.tool_use(),
                            };
                        }
                    }
                }

                let mut response = Message::assistant();
                if !text.is_empty() {
                    response = response.with_text(text);
                }
                let mut finished = HashMap::new();
                for call in calls.values() {
                    let tool_use = call.finished();
                    response = response.with_tool_request(tool_use.tool_use_id.clone(), parse_tool_call(&tool_use));
                    yield AgentEvent::ToolUse {
                        cycle_id: cycle_id.clone(),
                        tool_use: tool_use.clone(),
                    };
                    finished.insert(tool_use.tool_use_id.clone(), tool_use);
                }

                messages.push(response.clone());
                yield AgentEvent::Message(response.clone());

                let tool_requests: Vec<&ToolRequest> = response.tool_requests();
                if tool_requests.is_empty() {
                    break;
                }

                // Dispatch in parallel but wait until all are finished
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| self.dispatch_tool_call(request.tool_call.clone()))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                let mut message_tool_response = Message::user();
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    if let (Err(error), Some(tool_use)) = (&output, finished.get(&request.id)) {
                        tracing::warn!(tool = %tool_use.name, "Tool call failed: {}", error);
                        yield AgentEvent::ToolFailed {
                            cycle_id: cycle_id.clone(),
                            tool_use: tool_use.clone(),
                            error: error.clone(),
                        };
                    }
                    message_tool_response = message_tool_response.with_tool_response(
                        request.id.clone(),
                        output,
                    );
                }

                messages.push(message_tool_response.clone());
                yield AgentEvent::Message(message_tool_response);
            }
        }))
    }
}

fn parse_tool_call(tool_use: &ToolUse) -> AgentResult<ToolCall> {
    if !is_valid_function_name(&tool_use.name) {
        return Err(AgentError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            tool_use.name
        )));
    }
    serde_json::from_str(&tool_use.input)
        .map(|arguments| ToolCall::new(&tool_use.name, arguments))
        .map_err(|e| {
            AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                tool_use.tool_use_id, e
            ))
        })
}

/// Keep at most `window` of the most recent messages. The kept history always
/// opens with a plain user message so no tool response loses its request.
pub fn trim_history(messages: &mut Vec<Message>, window: usize) {
    if messages.len() > window {
        messages.drain(..messages.len() - window);
    }
    let start = messages
        .iter()
        .position(|m| m.role == Role::User && !m.is_tool_response())
        .unwrap_or(messages.len());
    messages.drain(..start);
}
