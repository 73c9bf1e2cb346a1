use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::{AppState, TrainRequest, TrainingStatus},
    domain::{DiseaseType, Forecast, ModelKey, MunicipalityCode},
    ml::{ArtifactSummary, ModelMetrics},
};

fn parse_key(raw: &str) -> Result<ModelKey, ApiError> {
    raw.parse::<ModelKey>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrainBody {
    pub municipality_code: String,
    /// dengue, chikungunya or zika, any case
    pub disease_type: String,
    #[serde(default)]
    pub use_synthetic_data: bool,
    #[validate(range(min = 1, max = 1000))]
    pub epochs: Option<usize>,
}

impl TrainBody {
    fn key(&self) -> Result<ModelKey, ApiError> {
        let code = MunicipalityCode::new(self.municipality_code.as_str())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let disease = self
            .disease_type
            .parse::<DiseaseType>()
            .map_err(|_| ApiError::BadRequest(format!("unknown disease '{}'", self.disease_type)))?;
        Ok(ModelKey::new(code, disease))
    }
}

/// POST /api/v1/models/train - Start background training
pub async fn train(
    State(state): State<AppState>,
    Json(body): Json<TrainBody>,
) -> Result<ApiResponse<TrainingStatus>, ApiError> {
    body.validate()?;
    let request = TrainRequest {
        key: body.key()?,
        use_synthetic_data: body.use_synthetic_data,
        epochs: body.epochs.unwrap_or_else(|| state.service.default_epochs()),
    };
    let status = state.start_training(request)?;
    Ok(ApiResponse::accepted(status))
}

/// GET /api/v1/models/:key/training
pub async fn training_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<ApiResponse<TrainingStatus>, ApiError> {
    let key = parse_key(&key)?;
    let status = state
        .training
        .get(&key)
        .ok_or_else(|| ApiError::NotFound(format!("no training requested for {key}")))?;
    Ok(ApiResponse::success(status))
}

/// GET /api/v1/training
pub async fn list_training(State(state): State<AppState>) -> ApiResponse<Vec<TrainingStatus>> {
    let all = state.training.all();
    let count = all.len();
    ApiResponse::success(all).with_count(count)
}

/// GET /api/v1/models
pub async fn list_models(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<ArtifactSummary>>, ApiError> {
    let models = state.service.list_models()?;
    let count = models.len();
    Ok(ApiResponse::success(models).with_count(count))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub key: ModelKey,
    pub artifact_id: String,
    pub metrics: ModelMetrics,
}

/// GET /api/v1/models/:key
pub async fn model_info(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<ApiResponse<ModelInfo>, ApiError> {
    let key = parse_key(&key)?;
    let (artifact_id, metrics) = state.service.model_metrics(&key).await?;
    Ok(ApiResponse::success(ModelInfo {
        key,
        artifact_id,
        metrics,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PredictParams {
    #[validate(range(min = 1, max = 52))]
    pub weeks_ahead: Option<u32>,
}

impl PredictParams {
    fn weeks(&self, state: &AppState) -> Result<u32, ApiError> {
        self.validate()?;
        Ok(self.weeks_ahead.unwrap_or(state.cfg.scheduler.weeks_ahead))
    }
}

/// GET /api/v1/models/:key/predict?weeks_ahead=N
pub async fn predict_query(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<PredictParams>,
) -> Result<ApiResponse<Vec<Forecast>>, ApiError> {
    predict_inner(&state, &key, &params).await
}

/// POST /api/v1/models/:key/predict
pub async fn predict(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(params): Json<PredictParams>,
) -> Result<ApiResponse<Vec<Forecast>>, ApiError> {
    predict_inner(&state, &key, &params).await
}

async fn predict_inner(
    state: &AppState,
    key: &str,
    params: &PredictParams,
) -> Result<ApiResponse<Vec<Forecast>>, ApiError> {
    let start = Instant::now();
    let key = parse_key(key)?;
    let forecasts = state.service.predict(&key, params.weeks(state)?).await?;
    let count = forecasts.len();
    Ok(ApiResponse::success(forecasts)
        .with_count(count)
        .with_duration(start.elapsed().as_millis() as u64))
}

/// POST /api/v1/models/:key/save-predictions
pub async fn save_predictions(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(params): Json<PredictParams>,
) -> Result<ApiResponse<Vec<Forecast>>, ApiError> {
    let key = parse_key(&key)?;
    let forecasts = state
        .service
        .save_predictions(&key, params.weeks(&state)?)
        .await?;
    let count = forecasts.len();
    Ok(ApiResponse::success(forecasts).with_count(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_body_key_is_case_insensitive() {
        let body: TrainBody = serde_json::from_value(serde_json::json!({
            "municipality_code": "3550308",
            "disease_type": "Dengue"
        }))
        .unwrap();
        assert!(!body.use_synthetic_data);
        assert_eq!(body.key().unwrap().to_string(), "3550308_dengue");
    }

    #[test]
    fn test_train_body_rejects_bad_input() {
        let body = TrainBody {
            municipality_code: "355030".to_string(),
            disease_type: "dengue".to_string(),
            use_synthetic_data: false,
            epochs: Some(0),
        };
        assert!(body.validate().is_err());
        assert!(body.key().is_err());
    }

    #[test]
    fn test_predict_params_range() {
        assert!(PredictParams { weeks_ahead: Some(52) }.validate().is_ok());
        assert!(PredictParams { weeks_ahead: Some(53) }.validate().is_err());
        assert!(PredictParams { weeks_ahead: None }.validate().is_ok());
    }
}
