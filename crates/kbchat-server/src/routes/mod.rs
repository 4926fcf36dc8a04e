pub mod health;
pub mod reply;

use crate::state::AppState;
use axum::Router;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(health::routes(state.clone()))
        .merge(reply::routes(state))
}
