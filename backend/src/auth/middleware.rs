use super::{AuthError, Authenticator};
use actix_web::http::header::Header;
use actix_web::{FromRequest, HttpRequest, web};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use futures::future::{Ready, ready};

/// Caller id taken from a verified `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

fn validate_request_token(req: &HttpRequest) -> Result<String, AuthError> {
    let authenticator = req
        .app_data::<web::Data<dyn Authenticator>>()
        .ok_or_else(|| AuthError::Invalid("no authenticator configured".to_string()))?;
    let header = Authorization::<Bearer>::parse(req).map_err(|_| AuthError::Missing)?;
    let token = header.as_ref().token();

    authenticator.authenticate(token)
}

impl FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(match validate_request_token(req) {
            Ok(user_id) => {
                log::debug!("Authenticated user {} for path {}", user_id, req.path());
                Ok(AuthenticatedUser(user_id))
            }
            Err(auth_error) => {
                log::warn!("Authentication failed for path {}: {}", req.path(), auth_error);
                Err(auth_error)
            }
        })
    }
}
