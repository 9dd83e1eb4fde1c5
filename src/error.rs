/// Unified error types for the account portal
use crate::{
    tokens::TokenRejection,
    validation::{FieldError, FormErrors},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// The only message a caller ever sees for a rejected activation or reset link
pub const TOKEN_INVALID_MESSAGE: &str = "Invalid or expired link.";

/// Main error type for the portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors at startup
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Malformed or mismatched form input, keyed by field
    #[error("Validation error: {0}")]
    Validation(FormErrors),

    /// Bad credentials or inactive account
    #[error("{0}")]
    Authentication(String),

    /// Activation or reset token rejected. The reason is kept for logging only.
    #[error("Token rejected: {0:?}")]
    TokenInvalid(TokenRejection),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),

    /// Mail delivery errors
    #[error("Email error: {0}")]
    Email(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Single-field validation failure
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        PortalError::Validation(FormErrors::single(field, message))
    }
}

impl From<FieldError> for PortalError {
    fn from(error: FieldError) -> Self {
        PortalError::Validation(error.into())
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, Vec<String>>>,
}

/// Convert PortalError to HTTP response
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let mut fields = None;
        let (status, error_code, message) = match self {
            PortalError::Validation(errors) => {
                let message = errors
                    .first_message()
                    .unwrap_or("Invalid request")
                    .to_string();
                fields = Some(errors.into_map());
                (StatusCode::BAD_REQUEST, "ValidationError", message)
            }
            PortalError::Authentication(message) => {
                (StatusCode::UNAUTHORIZED, "AuthenticationFailure", message)
            }
            // Collapsed on purpose: which case occurred never reaches the caller
            PortalError::TokenInvalid(_) => (
                StatusCode::BAD_REQUEST,
                "TokenInvalid",
                TOKEN_INVALID_MESSAGE.to_string(),
            ),
            PortalError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            fields,
        });

        (status, body).into_response()
    }
}

/// Result type alias for portal operations
pub type PortalResult<T> = Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: PortalError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_token_rejections_share_one_message() {
        let mut messages = Vec::new();
        for reason in [
            TokenRejection::NotFound,
            TokenRejection::AlreadyUsed,
            TokenRejection::Expired,
        ] {
            let (status, body) = body_of(PortalError::TokenInvalid(reason)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            messages.push(body.message);
        }
        assert!(messages.iter().all(|m| m == TOKEN_INVALID_MESSAGE));
    }

    #[tokio::test]
    async fn test_internal_errors_do_not_leak() {
        let (status, body) =
            body_of(PortalError::Internal("smtp password rejected".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Internal server error");
    }

    #[tokio::test]
    async fn test_validation_error_carries_fields() {
        let (status, body) = body_of(PortalError::field("captcha", "Captcha is incorrect.")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Captcha is incorrect.");
        let fields = body.fields.unwrap();
        assert_eq!(fields["captcha"], vec!["Captcha is incorrect.".to_string()]);
    }
}
