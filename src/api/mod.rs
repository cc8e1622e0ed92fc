//! HTTP API module for health, status and the command surface.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
