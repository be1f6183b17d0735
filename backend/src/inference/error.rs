use super::preprocess::ValidationError;
use super::scorer::ScoreError;

/// Everything `submit` can fail with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Prediction queue is full")]
    Overloaded,
    #[error("Model is not available")]
    ServiceUnavailable,
    /// Detail is for server logs only.
    #[error("Prediction error: {0}")]
    Internal(String),
}

impl From<ScoreError> for PredictionError {
    fn from(err: ScoreError) -> Self {
        PredictionError::Internal(err.to_string())
    }
}
