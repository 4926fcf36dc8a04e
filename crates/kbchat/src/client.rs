//! The chat client: submits a query to the gateway and drives one turn of the
//! conversation from the resulting event stream.
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Serialize;

use crate::conversation::ConversationState;
use crate::decoder::{decode, FrameStream};
use crate::errors::DecodeError;
use crate::render::{redraw, View};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/stream_chat";

/// Where the frames of a turn come from
#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn stream_chat(&self, query: &str) -> Result<FrameStream, DecodeError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
    session_id: &'a str,
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
    session_id: String,
}

impl ChatClient {
    pub fn new<E, S>(endpoint: E, session_id: S, connect_timeout: Duration) -> Result<Self>
    where
        E: Into<String>,
        S: Into<String>,
    {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            session_id: session_id.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl ChatSource for ChatClient {
    async fn stream_chat(&self, query: &str) -> Result<FrameStream, DecodeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(&ChatRequest {
                query,
                session_id: &self.session_id,
            })
            .send()
            .await
            .map_err(|e| DecodeError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecodeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode(response.bytes_stream()))
    }
}

/// How often a turn redraws while frames are arriving. The end of a turn is
/// always drawn regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedrawPolicy {
    pub every: usize,
}

impl Default for RedrawPolicy {
    fn default() -> Self {
        Self { every: 3 }
    }
}

impl RedrawPolicy {
    pub fn every(every: usize) -> Self {
        Self { every }
    }

    fn should_redraw(&self, frames: usize) -> bool {
        self.every <= 1 || frames % self.every == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { frames: usize },
    Failed { reason: String },
    Cancelled,
}

/// Run one turn to completion
pub async fn run_turn<S, V>(
    source: &S,
    state: &mut ConversationState,
    view: &mut V,
    query: &str,
    policy: RedrawPolicy,
) -> TurnOutcome
where
    S: ChatSource + ?Sized,
    V: View + ?Sized,
{
    run_turn_until(source, state, view, query, policy, futures::future::pending::<()>()).await
}

/// Run one turn, abandoning it as soon as `cancel` resolves.
///
/// Dropping the stream releases the connection; whatever the turn accumulated
/// up to that point stays in `state`.
pub async fn run_turn_until<S, V, C>(
    source: &S,
    state: &mut ConversationState,
    view: &mut V,
    query: &str,
    policy: RedrawPolicy,
    cancel: C,
) -> TurnOutcome
where
    S: ChatSource + ?Sized,
    V: View + ?Sized,
    C: Future<Output = ()>,
{
    let finished = tokio::select! {
        outcome = drive_turn(source, state, view, query, policy) => Some(outcome),
        _ = cancel => None,
    };

    match finished {
        Some(outcome) => outcome,
        None => {
            tracing::info!("Turn cancelled, keeping partial state");
            state.abandon();
            redraw(view, state);
            TurnOutcome::Cancelled
        }
    }
}

async fn drive_turn<S, V>(
    source: &S,
    state: &mut ConversationState,
    view: &mut V,
    query: &str,
    policy: RedrawPolicy,
) -> TurnOutcome
where
    S: ChatSource + ?Sized,
    V: View + ?Sized,
{
    state.submit(query);
    redraw(view, state);

    let mut stream = match source.stream_chat(query).await {
        Ok(stream) => stream,
        Err(e) => return fail(state, view, e),
    };

    let mut frames = 0;
    while let Some(next) = stream.next().await {
        match next {
            Ok(frame) => {
                if frames == 0 {
                    state.remove_loading();
                }
                frames += 1;
                state.apply_frame(frame);
                if policy.should_redraw(frames) {
                    redraw(view, state);
                }
            }
            Err(e) => return fail(state, view, e),
        }
    }

    if frames == 0 {
        tracing::warn!("Agent stream ended without any events");
        state.remove_loading();
    }
    state.complete();
    redraw(view, state);
    TurnOutcome::Completed { frames }
}

fn fail<V>(state: &mut ConversationState, view: &mut V, error: DecodeError) -> TurnOutcome
where
    V: View + ?Sized,
{
    tracing::error!("Connection error: {}", error);
    let reason = error.to_string();
    state.fail(&reason);
    redraw(view, state);
    TurnOutcome::Failed { reason }
}
