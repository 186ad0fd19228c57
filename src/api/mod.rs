// API module - HTTP endpoints

use axum::{routing::get, Router};

use middleware::state::AppState;

pub mod cards;
pub mod health;
pub mod middleware;

/// Full application router, without transport layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(cards::router())
        .with_state(state)
}
