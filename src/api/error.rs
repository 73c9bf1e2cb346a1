use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::controller::ServiceError;
use crate::error::PipelineError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) | ApiError::StorageError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::Unprocessable(_) => "DataInsufficient",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InternalError(_) => "InternalServerError",
            ApiError::StorageError(_) => "StorageError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let message = match &self {
            ApiError::InternalError(_) | ApiError::StorageError(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::DataInsufficient(_) => ApiError::Unprocessable(error.to_string()),
            PipelineError::Configuration(msg) => ApiError::BadRequest(msg),
            PipelineError::ModelNotReady(_) | PipelineError::ArtifactNotFound(_) => {
                ApiError::NotFound(error.to_string())
            }
            PipelineError::TrainingInProgress(_) => ApiError::Conflict(error.to_string()),
            PipelineError::ArtifactMismatch { .. }
            | PipelineError::Training(_)
            | PipelineError::Io(_)
            | PipelineError::Serialization(_) => ApiError::InternalError(error.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Pipeline(e) => e.into(),
            ServiceError::Store(e) => ApiError::StorageError(format!("{e:#}")),
            ServiceError::Worker(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{error:#}"))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DiseaseType, ModelKey, MunicipalityCode};
    use crate::error::InsufficientData;
    use rstest::rstest;

    fn key() -> ModelKey {
        ModelKey::new(MunicipalityCode::new("3304557").unwrap(), DiseaseType::Dengue)
    }

    #[rstest]
    #[case(PipelineError::DataInsufficient(InsufficientData { stage: "feature_builder", available: 3, required: 10 }), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(PipelineError::Configuration("bad".into()), StatusCode::BAD_REQUEST)]
    #[case(PipelineError::ModelNotReady("none".into()), StatusCode::NOT_FOUND)]
    #[case(PipelineError::ArtifactNotFound("x".into()), StatusCode::NOT_FOUND)]
    #[case(PipelineError::TrainingInProgress(key()), StatusCode::CONFLICT)]
    #[case(PipelineError::Training("nan".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(PipelineError::ArtifactMismatch { artifact_id: "a".into(), part: "scalers", expected: "1".into(), found: "2".into() }, StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_pipeline_error_status(#[case] error: PipelineError, #[case] expected: StatusCode) {
        assert_eq!(ApiError::from(error).status_code(), expected);
    }

    #[test]
    fn test_store_errors_are_internal() {
        let error = ApiError::from(ServiceError::Store(anyhow::anyhow!("connection refused")));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.error_type(), "StorageError");
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::NotFound("model 3304557_dengue".to_string());
        assert_eq!(error.to_string(), "Resource not found: model 3304557_dengue");
    }
}
