//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::arbitrage::{ArbitrageOpportunity, Orchestrator, StatusSnapshot};
use crate::pricing::{PriceEntry, PriceMonitor};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Whether the loops are running.
    pub ready: Arc<AtomicBool>,
    /// Scan and execution loop.
    pub orchestrator: Arc<Orchestrator>,
    /// Price cache.
    pub monitor: Arc<PriceMonitor>,
}

impl AppState {
    /// Create new app state.
    pub fn new(orchestrator: Arc<Orchestrator>, monitor: Arc<PriceMonitor>) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            orchestrator,
            monitor,
        }
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Registered agent, absent in fallback-only mode.
    pub agent_id: Option<String>,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// "running" or "starting".
    pub status: &'static str,
    /// Orchestrator snapshot.
    #[serde(flatten)]
    pub orchestrator: StatusSnapshot,
}

/// Opportunity list response.
#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    /// Number of opportunities.
    pub count: usize,
    /// Ranked opportunities, best first.
    pub opportunities: Vec<ArbitrageOpportunity>,
}

/// Accepted manual execution.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    /// Always true.
    pub accepted: bool,
    /// Opportunity being executed.
    pub opportunity_id: String,
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Cached prices response.
#[derive(Debug, Serialize)]
pub struct PricesResponse {
    /// Number of entries.
    pub count: usize,
    /// Entries ordered by symbol then network.
    pub prices: Vec<PriceEntry>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let response = ReadyResponse {
        ready: is_ready,
        agent_id: state.orchestrator.agent_id(),
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - phase, last scan, last execution and counters.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.is_ready() { "running" } else { "starting" };

    Json(StatusResponse {
        status,
        orchestrator: state.orchestrator.status(),
    })
}

/// Opportunities from the most recent scan.
pub async fn opportunities(State(state): State<AppState>) -> impl IntoResponse {
    let opportunities = state.orchestrator.latest_opportunities();
    Json(OpportunitiesResponse {
        count: opportunities.len(),
        opportunities,
    })
}

/// Trigger execution of an opportunity from the most recent scan.
///
/// Returns 202 once the guard is held and the execution is running in the
/// background, 404 for an unknown id and 409 while another execution is in
/// flight.
pub async fn execute_opportunity(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(opportunity) = state.orchestrator.opportunity(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("unknown opportunity: {}", id),
            }),
        )
            .into_response();
    };

    let Some(permit) = state.orchestrator.try_begin() else {
        warn!(id = %id, "Manual execution rejected, another execution is in flight");
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "an execution is already in flight".to_string(),
            }),
        )
            .into_response();
    };

    info!(id = %id, "Manual execution accepted");
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        if let Err(e) = orchestrator.execute_with(permit, opportunity).await {
            error!(error = %e, "Manual execution failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            accepted: true,
            opportunity_id: id,
        }),
    )
        .into_response()
}

/// Cached prices.
pub async fn prices(State(state): State<AppState>) -> impl IntoResponse {
    let prices = state.monitor.all_prices();
    Json(PricesResponse {
        count: prices.len(),
        prices,
    })
}
