//! Health check handlers for service monitoring.
//!
//! Provides liveness, readiness, and health endpoints with database
//! connectivity checks for orchestration systems.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status.
    pub status: HealthStatus,
    /// Timestamp when the health check was performed.
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks.
    pub checks: HealthChecks,
    /// Service version information.
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Critical systems failing.
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity and basic query test.
    pub database: ComponentHealth,
}

/// Health status for an individual component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status.
    pub status: ComponentStatus,
    /// Optional error message if unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Component-level health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy.
    Up,
    /// Component is experiencing issues.
    Down,
}

/// Primary health check endpoint.
///
/// Returns structured JSON with overall status and component details.
/// 200 when healthy, 503 when the database is unreachable.
pub async fn health_check(State(state): State<AppState>) -> Response {
    debug!("performing health check");

    let database = match state.store.health_check().await {
        Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None },
        Err(e) => {
            error!(error = %e, "database health check failed");
            ComponentHealth { status: ComponentStatus::Down, message: Some(e.to_string()) }
        },
    };

    let (status, overall) = match database.status {
        ComponentStatus::Up => (StatusCode::OK, HealthStatus::Healthy),
        ComponentStatus::Down => (StatusCode::SERVICE_UNAVAILABLE, HealthStatus::Unhealthy),
    };

    let body = HealthResponse {
        status: overall,
        timestamp: Utc::now(),
        checks: HealthChecks { database },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status, Json(body)).into_response()
}

/// Liveness probe. Always succeeds while the process can serve requests.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe. Fails until the database is reachable.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    match state.store.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}
