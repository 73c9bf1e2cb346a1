pub mod data;
pub mod error;
pub mod health;
pub mod models;
pub mod response;
pub mod summary;
pub mod tasks;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::warn;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{config::Config, controller::AppState};

pub fn router(state: AppState, cfg: &Config) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .nest("/api/v1", v1())
        .with_state(state);

    if cfg.server.enable_cors {
        let origins: Vec<HeaderValue> = cfg
            .server
            .cors_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(%origin, error = %e, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        // tower-http rejects "*" inside an origin list
        let allow_origin = if cfg.server.cors_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(origins)
        };
        let cors = CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    cfg.server.request_timeout_secs,
                ))),
        )
        .layer(TraceLayer::new_for_http())
}

/// Routes under `/api/v1`.
///
/// `/models/train` is a static segment and takes precedence over
/// `/models/:key`, so `GET /models/train` answers 405 rather than looking up
/// a model named "train".
fn v1() -> Router<AppState> {
    Router::new()
        .route("/models", get(models::list_models))
        .route("/models/train", post(models::train))
        .route("/models/:key", get(models::model_info))
        .route("/models/:key/training", get(models::training_status))
        .route(
            "/models/:key/predict",
            get(models::predict_query).post(models::predict),
        )
        .route("/models/:key/save-predictions", post(models::save_predictions))
        .route("/training", get(models::list_training))
        .route("/data/climate", get(data::list_climate))
        .route("/data/surveillance", get(data::list_surveillance))
        .route("/data/forecasts", get(data::list_forecasts))
        .route("/data/forecasts/latest", get(data::latest_forecasts))
        .route("/data/surveillance/summary", get(data::surveillance_summary))
        .route("/data/cleanup", post(data::cleanup))
        .route("/statistics", get(summary::statistics))
        .route("/summary/state/:state", get(summary::state_summary))
        .route("/tasks", get(tasks::scheduler_status))
        .route("/tasks/run-all", post(tasks::run_all))
        .route("/tasks/:name/run", post(tasks::run_task))
        .route("/scheduler/start", post(tasks::start_scheduler))
        .route("/scheduler/stop", post(tasks::stop_scheduler))
}
