use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;

use crate::db::RepositoryError;
use crate::inference::PredictionError;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Failures surfaced by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("History lookup failed: {0}")]
    History(#[from] RepositoryError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Prediction(PredictionError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Prediction(PredictionError::Overloaded) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Prediction(PredictionError::ServiceUnavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Prediction(PredictionError::Internal(_)) | ApiError::History(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            ApiError::Prediction(PredictionError::Internal(_)) => {
                "Prediction processing failed".to_string()
            }
            ApiError::History(_) => "Failed to get predictions".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse { error })
    }
}
