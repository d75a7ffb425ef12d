//! `/health`, `/ready`, `/health/persistence` (spec.md §6). `/metrics` is
//! wired directly in `main.rs` since it needs the Prometheus exporter
//! handle rather than `AppState`.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

/// Liveness: the process is up and serving requests at all.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    ready: bool,
}

/// Readiness: whether the process should receive traffic. Currently a
/// liveness alias -- cache/db connectivity is exercised per-request and
/// surfaces as 503s rather than gating readiness, matching the teacher's
/// own `/health` handler which never pings its collaborators either.
pub async fn ready() -> Json<ReadyResponse> {
    Json(ReadyResponse { ready: true })
}

#[derive(Debug, Serialize)]
pub struct PersistenceHealthResponse {
    healthy: bool,
    #[serde(rename = "consecutiveFailures")]
    consecutive_failures: u32,
    #[serde(rename = "secondsSinceLastSuccess")]
    seconds_since_last_success: i64,
}

/// `GET /health/persistence` (spec.md §4.10 "Health"): healthy iff
/// `consecutiveFailures <= 5 AND now - lastSuccessfulCycle < 60s`.
pub async fn persistence_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<PersistenceHealthResponse>) {
    let health = &state.persistence_health;
    let body = PersistenceHealthResponse {
        healthy: health.is_healthy(),
        consecutive_failures: health.consecutive_failures(),
        seconds_since_last_success: health.seconds_since_last_success(),
    };
    let status = if body.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
