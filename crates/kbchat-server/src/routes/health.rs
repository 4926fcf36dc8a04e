use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    agent_initialized: bool,
    message: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let agent_initialized = state.agent.is_some();
    Json(HealthResponse {
        status: "healthy",
        agent_initialized,
        message: if agent_initialized {
            "Knowledge base agent is running."
        } else {
            "Agent failed to initialize, check the server logs."
        },
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}
