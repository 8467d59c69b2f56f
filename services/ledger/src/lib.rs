// Library interface for the ledger service - exposes modules for testing

pub mod accounts;
pub mod config;
pub mod domain;
pub mod errors;
pub mod fairness;
pub mod fees;
pub mod handlers;
pub mod periods;
pub mod repository;
pub mod session;
pub mod settlement;
pub mod state;
pub mod wager;

use axum::{routing::get, Router};
use state::AppState;
use tower_http::trace::TraceLayer;

/// Build the operator router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
