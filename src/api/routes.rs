//! HTTP API route definitions.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{execute_opportunity, health, opportunities, prices, ready, status, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Command surface
        .route("/api/v1/status", get(status))
        .route("/api/v1/opportunities", get(opportunities))
        .route("/api/v1/opportunities/:id/execute", post(execute_opportunity))
        .route("/api/v1/prices", get(prices))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
