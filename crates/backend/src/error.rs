//! Unified error handling for the HTTP surface.
//!
//! `ApiError` implements `IntoResponse`, so handlers use `?` on engine calls
//! and the status code mapping lives in one place.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared_types::ErrorResponse;
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Message shared by every credential failure, so callers cannot tell an
/// unknown email from a wrong password.
const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No usable `Authorization: Bearer` header
    #[error("Missing bearer token")]
    MissingToken,
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::bad_request(e.body_text()),
            JsonRejection::JsonSyntaxError(e) => ApiError::bad_request(e.body_text()),
            JsonRejection::MissingJsonContentType(e) => ApiError::bad_request(e.body_text()),
            other => ApiError::bad_request(other.body_text()),
        }
    }
}

fn auth_error_parts(err: &AuthError) -> (StatusCode, String, Option<String>) {
    if err.is_credential_failure() {
        return (
            StatusCode::UNAUTHORIZED,
            INVALID_CREDENTIALS.to_string(),
            None,
        );
    }

    if err.is_token_failure() {
        tracing::debug!("Rejected token: {}", err);
    }

    match err {
        AuthError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string(), None),
        AuthError::AlreadyExists => (
            StatusCode::CONFLICT,
            "User already exists".to_string(),
            None,
        ),
        AuthError::InvalidToken(_) => (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired token".to_string(),
            None,
        ),
        AuthError::TokenRevoked => (
            StatusCode::UNAUTHORIZED,
            "Token has been revoked".to_string(),
            None,
        ),
        AuthError::Store(e) if e.is_transient() => {
            tracing::error!("Credential store unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Credential store unavailable".to_string(),
                None,
            )
        }
        AuthError::Store(e) => {
            tracing::error!("Store error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Credential store operation failed".to_string(),
                None,
            )
        }
        AuthError::NotFound | AuthError::PasswordMismatch | AuthError::Internal(_) => {
            tracing::error!("Internal auth error: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::Auth(e) => auth_error_parts(e),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "Missing authentication".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenError;
    use shared_types::ValidationError;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(AuthError::Validation(ValidationError::InvalidEmail)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(AuthError::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(status_of(AuthError::NotFound), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::PasswordMismatch),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(AuthError::InvalidToken(TokenError::Expired)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_of(AuthError::TokenRevoked), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(AuthError::Store(StoreError::Timeout)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AuthError::Store(StoreError::Pool("exhausted".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AuthError::Store(StoreError::Backend("boom".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(ApiError::MissingToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(ApiError::bad_request("nope")),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_credential_failures_share_body() {
        async fn body_of(err: AuthError) -> String {
            let response = ApiError::from(err).into_response();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            String::from_utf8(bytes.to_vec()).unwrap()
        }

        assert_eq!(
            body_of(AuthError::NotFound).await,
            body_of(AuthError::PasswordMismatch).await
        );
    }
}
