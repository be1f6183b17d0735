use super::models::Claims;
use super::{AuthError, Authenticator};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
}

/// Verifies HS256 access tokens issued by the auth service.
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() {
            return Err(JwtError::InvalidToken);
        }

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(JwtError::InvalidToken);
        }

        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => {
                log::debug!(
                    "JWT token decoded successfully. User: {}, Iat: {}, Exp: {}",
                    token_data.claims.user_id,
                    token_data.claims.iat,
                    token_data.claims.exp
                );
                Ok(token_data.claims)
            }
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        Err(JwtError::TokenExpired)
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidToken
                    | jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        Err(JwtError::InvalidToken)
                    }
                    _ => Err(JwtError::Decoding(err.to_string())),
                }
            }
        }
    }
}

impl Authenticator for JwtService {
    fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        match self.verify_token(token) {
            Ok(claims) if claims.token_type == "access" => Ok(claims.user_id),
            Ok(claims) => Err(AuthError::Invalid(format!(
                "{} token cannot be used for API access",
                claims.token_type
            ))),
            Err(JwtError::TokenExpired) => Err(AuthError::Expired),
            Err(e) => Err(AuthError::Invalid(e.to_string())),
        }
    }
}

/// Signs an access token the way the auth service does.
#[cfg(test)]
pub(crate) fn issue_token(secret: &str, user_id: &str, lifetime: chrono::Duration) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let issued = chrono::Utc::now();
    let claims = Claims {
        user_id: user_id.to_string(),
        exp: (issued + lifetime).timestamp() as usize,
        iat: issued.timestamp() as usize,
        token_type: "access".to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .unwrap()
}
