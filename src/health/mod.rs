//! Gateway health endpoint.
//!
//! `GET /health` is served without authentication and reports each backend's
//! breaker-derived status. It never probes a backend itself.

pub mod report;

use axum::extract::State;
use axum::Json;

use crate::http::server::AppState;

pub use report::{HealthReport, ServiceHealth, ServiceStatus};

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::collect(
        &state.registry,
        &state.breakers,
        &state.sessions,
    ))
}
