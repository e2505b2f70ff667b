//! Health Check API
//!
//! Health check endpoints for monitoring and load balancers.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::server::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Timestamp (ISO 8601)
    pub timestamp: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe (minimal response)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: the store must answer a query
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.store.list_categories() {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!("Readiness check failed: {:#}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
