pub mod jwt;
pub mod middleware;
pub mod models;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or invalid authorization token")]
    Missing,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Turns a bearer credential into a verified caller id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<String, AuthError>;
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AuthError::Missing => "Missing or invalid authorization token",
            AuthError::Expired => "Token expired",
            AuthError::Invalid(_) => "Invalid token",
        };
        HttpResponse::Unauthorized().json(serde_json::json!({ "error": message }))
    }
}
