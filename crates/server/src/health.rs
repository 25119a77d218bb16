use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use globaliq_agent::orchestrator::DispatchStatsSnapshot;
use globaliq_core::domain::service::HealthStatus;
use serde::Serialize;

use crate::api::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    /// Cached liveness of every downstream service probed so far.
    pub downstream: Vec<HealthStatus>,
    pub dispatch: DispatchStatsSnapshot,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Readiness of this process. Unhealthy downstreams degrade the report but are served by the
/// fallback, so the status code stays 200.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = state.runtime.orchestrator();
    let downstream = orchestrator.health_snapshot();
    let degraded = downstream.iter().any(|status| !status.healthy);

    let payload = HealthResponse {
        status: if degraded { "degraded" } else { "ready" },
        service: HealthCheck {
            status: "ready",
            detail: "globaliq-server runtime initialized".to_string(),
        },
        downstream,
        dispatch: orchestrator.stats(),
        active_sessions: state.sessions.len(),
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
