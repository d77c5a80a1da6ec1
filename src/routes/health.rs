//! Health check endpoints for load balancers and Kubernetes health checks.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Service version
    pub version: String,
    /// Database round-trip status; absent when no database is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentStatus>,
}

/// Status of a single component.
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Full health check.
///
/// Runs a database round trip when a database is configured. Returns 503 when
/// it fails.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut overall_healthy = true;

    let database = match &state.db {
        Some(db) => {
            let start = std::time::Instant::now();
            let result = db.health_check().await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let message = match &result {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Database health check failed");
                    overall_healthy = false;
                    Some("Database connection failed".to_string())
                }
            };

            Some(ComponentStatus {
                healthy: result.is_ok(),
                message,
                latency_ms: Some(latency_ms),
            })
        }
        None => None,
    };

    let health = HealthStatus {
        status: if overall_healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    };

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Liveness check. Always 200 while the process serves requests.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness check.
///
/// Ready when the database answers, or always when running without one.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(db) = &state.db
        && db.health_check().await.is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::OK
}
