use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::controller::{AppState, SchedulerStatus};
use crate::repo::ClimateQuery;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
    loaded_models: usize,
    scheduler: SchedulerStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    record_store: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: "healthy".to_string(),
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            latency_ms: None,
            error: Some(error),
        }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let record_store = check_record_store(&state).await;
    let all_healthy = record_store.is_healthy();

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now(),
        checks: HealthChecks { record_store },
        loaded_models: state.registry.len(),
        scheduler: state.scheduler.status().await,
    };

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

async fn check_record_store(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    let query = ClimateQuery {
        limit: Some(1),
        ..Default::default()
    };
    match state.store.climate(&query).await {
        Ok(_) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::unhealthy(format!("{e:#}")),
    }
}

/// GET /health/live
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_health() {
        let health = ComponentHealth::healthy(42);
        assert!(health.is_healthy());
        assert_eq!(health.latency_ms, Some(42));

        let health = ComponentHealth::unhealthy("Connection failed".to_string());
        assert!(!health.is_healthy());
        assert_eq!(health.error.as_deref(), Some("Connection failed"));
    }
}
