use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use kbchat::{
    agent::{trim_history, AgentEvent, ToolUse},
    models::event::{MessageData, SseFrame, ToolData, ToolState, STATE_KEY},
    models::message::Message,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default = "default_session_id")]
    session_id: String,
}

fn default_session_id() -> String {
    "default".to_string()
}

/// Streams preformatted event-stream frames from a channel. An error item
/// aborts the body, so the client sees a broken stream rather than a clean end.
pub struct SseResponse {
    rx: ReceiverStream<Result<String, io::Error>>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<Result<String, io::Error>>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|frame| frame.map(Bytes::from)))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

/// The `tool_input` of a tool frame: the arguments written so far plus
/// `state: done` once they form a JSON object, otherwise only the in-progress
/// state
pub fn tool_input(raw: &str) -> Value {
    with_state(raw, ToolState::Done)
        .unwrap_or_else(|| json!({ STATE_KEY: ToolState::InProgress.as_ref() }))
}

fn with_state(raw: &str, state: ToolState) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut map)) => {
            map.insert(STATE_KEY.to_string(), json!(state.as_ref()));
            Some(Value::Object(map))
        }
        _ => None,
    }
}

// Event-stream frame formatting
struct EventFormatter;

impl EventFormatter {
    fn format_text(cycle_id: &str, text: &str) -> String {
        SseFrame::from(MessageData {
            event_loop_cycle_id: cycle_id.to_string(),
            message: text.to_string(),
        })
        .to_wire()
    }

    fn format_tool(cycle_id: &str, tool_use: &ToolUse, input: Value) -> String {
        SseFrame::from(ToolData {
            event_loop_cycle_id: cycle_id.to_string(),
            tool_name: tool_use.name.clone(),
            tool_use_id: tool_use.tool_use_id.clone(),
            tool_input: input,
        })
        .to_wire()
    }

    fn format_tool_use(cycle_id: &str, tool_use: &ToolUse) -> String {
        Self::format_tool(cycle_id, tool_use, tool_input(&tool_use.input))
    }

    fn format_tool_error(cycle_id: &str, tool_use: &ToolUse) -> String {
        let input = with_state(&tool_use.input, ToolState::Error)
            .unwrap_or_else(|| json!({ STATE_KEY: ToolState::Error.as_ref() }));
        Self::format_tool(cycle_id, tool_use, input)
    }

    /// The frame for an event, if the client gets to see it
    fn format(event: &AgentEvent) -> Option<String> {
        match event {
            AgentEvent::Text { cycle_id, text } => Some(Self::format_text(cycle_id, text)),
            AgentEvent::ToolUse { cycle_id, tool_use } => {
                Some(Self::format_tool_use(cycle_id, tool_use))
            }
            AgentEvent::ToolFailed {
                cycle_id, tool_use, ..
            } => Some(Self::format_tool_error(cycle_id, tool_use)),
            AgentEvent::Message(_) => None,
        }
    }
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    if request.query.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let agent = state.agent.clone().ok_or_else(|| {
        tracing::warn!("Chat request refused, agent not initialized");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    tracing::info!(session_id = %request.session_id, "Processing chat request");
    let session = state.sessions.session(&request.session_id).await;
    let history_window = state.history_window;

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    tokio::spawn(async move {
        // Turns of one session never overlap
        let mut session = session.lock_owned().await;

        // The turn's messages only join the history once the turn completes,
        // so an abandoned turn never leaves tool requests without responses
        let mut staged = vec![Message::user().with_text(request.query)];
        let mut conversation = session.messages.clone();
        conversation.extend(staged.iter().cloned());

        let completed = match agent.reply(&conversation).await {
            Ok(mut stream) => loop {
                match timeout(Duration::from_millis(500), stream.next()).await {
                    Ok(Some(Ok(AgentEvent::Message(message)))) => {
                        staged.push(message);
                    }
                    Ok(Some(Ok(event))) => {
                        if let Some(frame) = EventFormatter::format(&event) {
                            if let Err(e) = tx.send(Ok(frame)).await {
                                tracing::info!("Client went away: {}", e);
                                break false;
                            }
                        }
                    }
                    Ok(Some(Err(e))) => {
                        tracing::error!("Error processing reply: {}", e);
                        abort(&tx, &e).await;
                        break false;
                    }
                    Ok(None) => {
                        break true;
                    }
                    Err(_) => {
                        // Heartbeat, used to detect disconnected clients and then end running tools.
                        if tx.is_closed() {
                            tracing::info!("Client disconnected, ending reply");
                            break false;
                        }
                        continue;
                    }
                }
            },
            Err(e) => {
                tracing::error!("Failed to start reply stream: {}", e);
                abort(&tx, &e).await;
                false
            }
        };

        if completed {
            session.messages.extend(staged);
            trim_history(&mut session.messages, history_window);
        } else {
            tracing::info!(session_id = %request.session_id, "Turn did not complete, history unchanged");
        }
        drop(tx);
    });

    Ok(SseResponse::new(stream))
}

/// End the response body with an error
async fn abort(tx: &mpsc::Sender<Result<String, io::Error>>, error: &anyhow::Error) {
    let _ = tx
        .send(Err(io::Error::new(io::ErrorKind::Other, error.to_string())))
        .await;
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/stream_chat", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use kbchat::agent::Agent;
    use kbchat::decoder::decode;
    use kbchat::errors::{AgentError, AgentResult};
    use kbchat::models::content::Content;
    use kbchat::models::tool::{Tool, ToolCall};
    use kbchat::providers::base::{DeltaStream, Provider, ProviderDelta};
    use kbchat::systems::System;
    use kbchat::errors::DecodeError;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    type Seen = Arc<Mutex<Vec<Vec<Message>>>>;

    struct ScriptedProvider {
        rounds: Mutex<Vec<Vec<ProviderDelta>>>,
        seen: Seen,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn stream(
            &self,
            _system: &str,
            messages: &[Message],
            _tools: &[Tool],
        ) -> anyhow::Result<DeltaStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut rounds = self.rounds.lock().unwrap();
            let deltas = if rounds.is_empty() {
                Vec::new()
            } else {
                rounds.remove(0)
            };
            Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
        }
    }

    /// Rejects every request, after some text when `partial` is set
    struct FailingProvider {
        partial: bool,
    }

    #[async_trait]
    impl Provider for FailingProvider {
        async fn stream(
            &self,
            _system: &str,
            _messages: &[Message],
            _tools: &[Tool],
        ) -> anyhow::Result<DeltaStream> {
            if !self.partial {
                return Err(anyhow::anyhow!("401 Unauthorized"));
            }
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(ProviderDelta::Text("Partial ".to_string())),
                Err(anyhow::anyhow!("connection reset")),
            ])))
        }
    }

    struct LookupSystem {
        tools: Vec<Tool>,
    }

    #[async_trait]
    impl System for LookupSystem {
        fn name(&self) -> &str {
            "LookupSystem"
        }

        fn description(&self) -> &str {
            "Looks things up"
        }

        fn instructions(&self) -> &str {
            "Use retrieve"
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
            match tool_call.arguments.get("text").and_then(|t| t.as_str()) {
                Some("fail") => Err(AgentError::ExecutionError("upstream down".into())),
                Some("slow") => {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(vec![Content::text("Eventually")])
                }
                Some(text) => Ok(vec![Content::text(format!("About {}", text))]),
                None => Err(AgentError::InvalidParameters("Missing 'text'".into())),
            }
        }
    }

    fn with_lookup(provider: Box<dyn Provider>) -> Agent {
        let mut agent = Agent::new(provider);
        agent.add_system(Box::new(LookupSystem {
            tools: vec![Tool::new("retrieve", "Retrieve", json!({"type": "object"}))],
        }));
        agent
    }

    fn recording_agent(rounds: Vec<Vec<ProviderDelta>>) -> (Agent, Seen) {
        let seen = Seen::default();
        let agent = with_lookup(Box::new(ScriptedProvider {
            rounds: Mutex::new(rounds),
            seen: seen.clone(),
        }));
        (agent, seen)
    }

    fn agent(rounds: Vec<Vec<ProviderDelta>>) -> Agent {
        recording_agent(rounds).0
    }

    fn tool_round(text: &str) -> Vec<ProviderDelta> {
        vec![
            ProviderDelta::Text("Searching. ".to_string()),
            ProviderDelta::ToolCall {
                index: 0,
                id: Some("t1".to_string()),
                name: Some("retrieve".to_string()),
                arguments: "{\"text\": ".to_string(),
            },
            ProviderDelta::ToolCall {
                index: 0,
                id: None,
                name: None,
                arguments: format!("\"{}\"}}", text),
            },
        ]
    }

    fn chat_request(body: Value) -> Request<Body> {
        Request::builder()
            .uri("/stream_chat")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn frames(app: Router, body: Value) -> Vec<SseFrame> {
        let response = app.oneshot(chat_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        decode(futures::stream::iter(vec![Ok::<_, std::io::Error>(bytes)]))
            .map(|frame| frame.unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_tool_input() {
        assert_eq!(
            tool_input("{\"text\": \"vpn\"}"),
            json!({"text": "vpn", "state": "done"})
        );
        assert_eq!(tool_input("{\"text\": "), json!({"state": "in-progress"}));
        assert_eq!(tool_input(""), json!({"state": "in-progress"}));
        assert_eq!(tool_input("[1, 2]"), json!({"state": "in-progress"}));
    }

    #[test]
    fn test_format_text() {
        assert_eq!(
            EventFormatter::format_text("c1", "Hello \"world\""),
            "event: message\ndata: {\"event_loop_cycle_id\":\"c1\",\"message\":\"Hello \\\"world\\\"\"}\n\n"
        );
    }

    #[test]
    fn test_format_tool_error() {
        let tool_use = ToolUse {
            tool_use_id: "t1".to_string(),
            name: "retrieve".to_string(),
            input: "{\"text\": \"x\"}".to_string(),
        };
        let wire = EventFormatter::format_tool_error("c1", &tool_use);
        assert!(wire.starts_with("event: tool\n"));
        assert!(wire.contains("\"toolUseId\":\"t1\""));
        assert!(wire.contains("\"state\":\"error\""));
    }

    #[tokio::test]
    async fn test_agent_not_initialized() {
        let app = routes(AppState::new(None, 30));
        let response = app
            .oneshot(chat_request(json!({"query": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let app = routes(AppState::new(Some(agent(vec![])), 30));

        let response = app
            .clone()
            .oneshot(chat_request(json!({"query": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .oneshot(chat_request(json!({"session_id": "s"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stream_chat_frames() {
        let state = AppState::new(
            Some(agent(vec![
                tool_round("vpn"),
                vec![ProviderDelta::Text("Here you go.".to_string())],
            ])),
            30,
        );
        let sessions: SessionStore = state.sessions.clone();
        let frames = frames(routes(state), json!({"query": "vpn?", "session_id": "s1"})).await;

        let events: Vec<_> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["message", "tool", "tool", "tool", "message"]
        );
        assert_eq!(frames[1].data["tool_input"], json!({"state": "in-progress"}));
        assert_eq!(
            frames[3].data["tool_input"],
            json!({"text": "vpn", "state": "done"})
        );
        assert_eq!(frames[3].data["toolUseId"], "t1");
        assert_eq!(frames[0].data["event_loop_cycle_id"], frames[3].data["event_loop_cycle_id"]);
        assert_ne!(frames[0].data["event_loop_cycle_id"], frames[4].data["event_loop_cycle_id"]);

        // user, assistant with tool request, tool response, final answer
        let session = sessions.session("s1").await;
        assert_eq!(session.lock().await.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_tool_emits_error_state() {
        let state = AppState::new(Some(agent(vec![tool_round("fail"), vec![]])), 30);
        let frames = frames(routes(state), json!({"query": "q"})).await;

        let last_tool = frames.iter().filter(|f| f.event == "tool").last().unwrap();
        assert_eq!(last_tool.data["tool_input"]["state"], "error");
    }

    #[tokio::test]
    async fn test_sessions_keep_history() {
        let state = AppState::new(
            Some(agent(vec![
                vec![ProviderDelta::Text("one".to_string())],
                vec![ProviderDelta::Text("two".to_string())],
            ])),
            30,
        );
        let sessions = state.sessions.clone();
        let app = routes(state);

        frames(app.clone(), json!({"query": "first"})).await;
        frames(app, json!({"query": "second"})).await;

        let session = sessions.session("default").await;
        let texts: Vec<_> = session
            .lock()
            .await
            .messages
            .iter()
            .map(|m| m.text())
            .collect();
        assert_eq!(texts, vec!["first", "one", "second", "two"]);
        assert_eq!(sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_provider_rejection_aborts_the_stream() {
        let state = AppState::new(Some(with_lookup(Box::new(FailingProvider { partial: false }))), 30);
        let sessions = state.sessions.clone();

        let response = routes(state)
            .oneshot(chat_request(json!({"query": "hello", "session_id": "s"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.into_body().collect().await.is_err());

        let session = sessions.session("s").await;
        assert!(session.lock().await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_failure_mid_answer_reaches_the_client_as_transport_error() {
        let state = AppState::new(Some(with_lookup(Box::new(FailingProvider { partial: true }))), 30);
        let sessions = state.sessions.clone();

        let response = routes(state)
            .oneshot(chat_request(json!({"query": "hello", "session_id": "s"})))
            .await
            .unwrap();
        let decoded: Vec<_> = decode(response.into_body().into_data_stream()).collect().await;

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_ref().unwrap().data["message"], "Partial ");
        assert!(matches!(decoded[1], Err(DecodeError::Transport(_))));

        let session = sessions.session("s").await;
        assert!(session.lock().await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_during_tool_leaves_history_unchanged() {
        let (agent, seen) = recording_agent(vec![
            tool_round("slow"),
            vec![ProviderDelta::Text("fresh".to_string())],
        ]);
        let state = AppState::new(Some(agent), 30);
        let sessions = state.sessions.clone();
        let app = routes(state);

        let response = app
            .clone()
            .oneshot(chat_request(json!({"query": "first", "session_id": "s"})))
            .await
            .unwrap();
        let mut body = response.into_body();
        let mut received = String::new();
        while !received.contains("\"state\":\"done\"") {
            let frame = body.frame().await.unwrap().unwrap();
            if let Ok(data) = frame.into_data() {
                received.push_str(&String::from_utf8_lossy(&data));
            }
        }
        // Leave while the tool is still running
        drop(body);

        let session = sessions.session("s").await;
        let history = tokio::time::timeout(Duration::from_secs(5), async {
            session.lock().await.messages.clone()
        })
        .await
        .unwrap();
        assert!(history.is_empty());

        frames(app, json!({"query": "second", "session_id": "s"})).await;

        let texts: Vec<_> = session
            .lock()
            .await
            .messages
            .iter()
            .map(|m| m.text())
            .collect();
        assert_eq!(texts, vec!["second", "fresh"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].len(), 1);
        assert!(seen[1].iter().all(|m| m.tool_requests().is_empty()));
    }
}
