//! On-demand runs of the collection and refresh jobs, and scheduler control.

use axum::extract::{Path, State};
use std::sync::Arc;
use std::time::Instant;
use strum::IntoEnumIterator;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::{AppState, SchedulerStatus, TaskName, TaskStatus},
};

/// GET /api/v1/tasks
pub async fn scheduler_status(State(state): State<AppState>) -> ApiResponse<SchedulerStatus> {
    ApiResponse::success(state.scheduler.status().await)
}

/// POST /api/v1/tasks/:name/run - Run one job now and wait for it
pub async fn run_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<ApiResponse<TaskStatus>, ApiError> {
    let task = name.parse::<TaskName>().map_err(|_| {
        ApiError::BadRequest(format!(
            "unknown task '{name}', expected one of climate, surveillance, forecast"
        ))
    })?;
    let start = Instant::now();
    let status = state.scheduler.run_now(task).await;
    Ok(ApiResponse::success(status).with_duration(start.elapsed().as_millis() as u64))
}

/// POST /api/v1/tasks/run-all - Collect, then refresh forecasts
pub async fn run_all(State(state): State<AppState>) -> ApiResponse<SchedulerStatus> {
    let start = Instant::now();
    for task in TaskName::iter() {
        state.scheduler.run_now(task).await;
    }
    ApiResponse::success(state.scheduler.status().await)
        .with_duration(start.elapsed().as_millis() as u64)
}

/// POST /api/v1/scheduler/start
pub async fn start_scheduler(State(state): State<AppState>) -> ApiResponse<SchedulerStatus> {
    if !Arc::clone(&state.scheduler).start() {
        tracing::debug!("Scheduler already running");
    }
    ApiResponse::success(state.scheduler.status().await)
}

/// POST /api/v1/scheduler/stop
pub async fn stop_scheduler(State(state): State<AppState>) -> ApiResponse<SchedulerStatus> {
    if !state.scheduler.stop() {
        tracing::debug!("Scheduler was not running");
    }
    ApiResponse::success(state.scheduler.status().await)
}
