use serde::Serialize;
use thiserror::Error;

use crate::domain::ModelKey;

/// Errors raised by the forecast pipeline and the model artifact store.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("insufficient data: {0}")]
    DataInsufficient(InsufficientData),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model not ready: {0}")]
    ModelNotReady(String),

    /// Artifact parts were produced by different training runs.
    #[error("artifact {artifact_id} is inconsistent: {part} belongs to run {found}, manifest expects {expected}")]
    ArtifactMismatch {
        artifact_id: String,
        part: &'static str,
        expected: String,
        found: String,
    },

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("training already in progress for {0}")]
    TrainingInProgress(ModelKey),

    #[error("training failed: {0}")]
    Training(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(error: bincode::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Why a pipeline stage could not produce a usable data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsufficientData {
    pub stage: &'static str,
    pub available: usize,
    pub required: usize,
}

impl std::fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} produced {} rows, at least {} required",
            self.stage, self.available, self.required
        )
    }
}

/// Outcome of a data preparation stage. Running out of data is an expected
/// result, distinct from a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared<T> {
    Ready(T),
    Insufficient(InsufficientData),
}

impl<T> Prepared<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Prepared::Ready(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Prepared<U> {
        match self {
            Prepared::Ready(value) => Prepared::Ready(f(value)),
            Prepared::Insufficient(reason) => Prepared::Insufficient(reason),
        }
    }

    /// Chain a further stage that can itself run out of data.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Prepared<U>) -> Prepared<U> {
        match self {
            Prepared::Ready(value) => f(value),
            Prepared::Insufficient(reason) => Prepared::Insufficient(reason),
        }
    }

    /// Escalate to an error for callers that cannot continue without data.
    pub fn require(self) -> PipelineResult<T> {
        match self {
            Prepared::Ready(value) => Ok(value),
            Prepared::Insufficient(reason) => Err(PipelineError::DataInsufficient(reason)),
        }
    }
}
