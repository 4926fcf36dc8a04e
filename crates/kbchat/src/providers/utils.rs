use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

use super::base::ProviderDelta;
use crate::models::content::Content;
use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = Map::new();
        converted.insert("role".to_string(), json!(message.role));
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        converted.insert("content".to_string(), json!(text.text));
                    }
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(contents) => {
                        let text: Vec<&str> = contents.iter().filter_map(Content::as_text).collect();
                        output.push(json!({
                            "role": "tool",
                            "content": text.join("\n"),
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // The model gets to see the error and decide what to do next
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if !tool_calls.is_empty() {
            converted.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }
        if converted.contains_key("content") || converted.contains_key("tool_calls") {
            output.insert(0, Value::Object(converted));
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Extract the deltas carried by one streamed `chat.completion.chunk`
pub fn parse_stream_chunk(chunk: &Value) -> Result<Vec<ProviderDelta>> {
    if let Some(error) = chunk.get("error") {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err.into());
        }
        return Err(anyhow!("OpenAI API error: {}", error));
    }

    let mut deltas = Vec::new();
    let Some(delta) = chunk.pointer("/choices/0/delta") else {
        return Ok(deltas);
    };

    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            deltas.push(ProviderDelta::Text(text.to_string()));
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for (position, call) in tool_calls.iter().enumerate() {
            let index = call
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as usize)
                .unwrap_or(position);
            let function = call.get("function");
            deltas.push(ProviderDelta::ToolCall {
                index,
                id: call.get("id").and_then(Value::as_str).map(String::from),
                name: function
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .map(String::from),
                arguments: function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    Ok(deltas)
}

pub fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::models::tool::ToolCall;

    #[test]
    fn test_messages_to_openai_spec() {
        let message = Message::user().with_text("Hello");
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_tool_round() {
        let messages = vec![
            Message::user().with_text("How do I reset my password?"),
            Message::assistant()
                .with_text("Let me look that up.")
                .with_tool_request(
                    "call_1",
                    Ok(ToolCall::new("retrieve", json!({"text": "reset password"}))),
                ),
            Message::user().with_tool_response(
                "call_1",
                Ok(vec![Content::text("Use the account page.")]),
            ),
            Message::user().with_tool_response(
                "call_2",
                Err(AgentError::ExecutionError("timed out".to_string())),
            ),
        ];

        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[1]["role"], "assistant");
        assert_eq!(spec[1]["content"], "Let me look that up.");
        assert_eq!(spec[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(spec[1]["tool_calls"][0]["function"]["name"], "retrieve");
        assert_eq!(
            spec[1]["tool_calls"][0]["function"]["arguments"],
            r#"{"text":"reset password"}"#
        );
        assert_eq!(spec[2]["role"], "tool");
        assert_eq!(spec[2]["content"], "Use the account page.");
        assert_eq!(spec[2]["tool_call_id"], "call_1");
        assert!(spec[3]["content"]
            .as_str()
            .unwrap()
            .contains("timed out"));
    }

    #[test]
    fn test_tools_to_openai_spec() -> Result<()> {
        let tool = Tool::new(
            "retrieve",
            "Search the knowledge base",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "retrieve");
        assert_eq!(spec[0]["function"]["parameters"]["required"][0], "text");
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("retrieve", "first", json!({}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result.unwrap_err().to_string().contains("Duplicate tool name"));
    }

    #[test]
    fn test_parse_stream_chunk_text() -> Result<()> {
        let chunk = json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": "Hel"}}]
        });
        assert_eq!(
            parse_stream_chunk(&chunk)?,
            vec![ProviderDelta::Text("Hel".to_string())]
        );
        Ok(())
    }

    #[test]
    fn test_parse_stream_chunk_tool_call_fragments() -> Result<()> {
        let first = json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "id": "call_1",
                "type": "function",
                "function": {"name": "retrieve", "arguments": ""}
            }]}}]
        });
        let second = json!({
            "choices": [{"delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "{\"text\":"}
            }]}}]
        });

        assert_eq!(
            parse_stream_chunk(&first)?,
            vec![ProviderDelta::ToolCall {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("retrieve".to_string()),
                arguments: String::new(),
            }]
        );
        assert_eq!(
            parse_stream_chunk(&second)?,
            vec![ProviderDelta::ToolCall {
                index: 0,
                id: None,
                name: None,
                arguments: "{\"text\":".to_string(),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_parse_stream_chunk_without_choices() -> Result<()> {
        let chunk = json!({"choices": [], "usage": {"total_tokens": 10}});
        assert!(parse_stream_chunk(&chunk)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_stream_chunk_error() {
        let chunk = json!({"error": {"code": "context_length_exceeded", "message": "too long"}});
        let err = parse_stream_chunk(&chunk).unwrap_err();
        assert!(err.downcast_ref::<ContextLengthExceededError>().is_some());

        let chunk = json!({"error": {"message": "bad key"}});
        let err = parse_stream_chunk(&chunk).unwrap_err();
        assert!(err.to_string().contains("OpenAI API error"));
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("retrieve"));
        assert!(is_valid_function_name("wiki_search"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name(""));
    }
}
