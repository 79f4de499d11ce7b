//! Health check endpoints
//!
//! Provides endpoints for monitoring and container orchestration:
//! - `/health` - Full health check with dependency status
//! - `/health/ready` - Readiness probe
//! - `/health/live` - Liveness probe

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual dependency check result
#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dependency checks collection
#[derive(Debug, Serialize)]
pub struct DependencyChecks {
    /// Stream store check; absent when durability is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<DependencyCheck>,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub durable: bool,
    pub checks: DependencyChecks,
}

/// Simple health response for liveness/readiness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
}

/// Full health check handler
///
/// Durability is best-effort, so a failing store check degrades the service
/// rather than marking it unhealthy: live streaming still works.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let store_check = match &state.store {
        Some(store) => {
            let started = Instant::now();
            let result = store.get("restream:health:probe").await;
            let latency_ms = started.elapsed().as_millis() as u64;
            Some(match result {
                Ok(_) => DependencyCheck {
                    status: HealthStatus::Healthy,
                    latency_ms,
                    error: None,
                },
                Err(e) => DependencyCheck {
                    status: HealthStatus::Unhealthy,
                    latency_ms,
                    error: Some(e.to_string()),
                },
            })
        }
        None => None,
    };

    let status = match &store_check {
        Some(check) if check.status != HealthStatus::Healthy => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    };

    let http_status = StatusCode::OK;
    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        durable: state.store.is_some(),
        checks: DependencyChecks { store: store_check },
    };

    (http_status, Json(response))
}

/// Readiness probe handler
pub async fn readiness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}

/// Liveness probe handler
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: HealthStatus::Healthy,
        }),
    )
}
