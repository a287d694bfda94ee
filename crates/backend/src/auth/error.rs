//! Typed failures of the auth engine.

use shared_types::ValidationError;
use thiserror::Error;

use super::jwt::TokenError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Input policy violation. Caller-recoverable, never retried.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("user already exists")]
    AlreadyExists,

    #[error("user not found")]
    NotFound,

    #[error("password does not match")]
    PasswordMismatch,

    /// Bad signature, expired, malformed, or a refresh token that does not
    /// belong to the presented access token.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    /// The token's registry entry is gone (rotated, revoked or expired).
    #[error("token is revoked")]
    TokenRevoked,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Credential failures that must look identical at the transport boundary.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, AuthError::NotFound | AuthError::PasswordMismatch)
    }

    /// Terminal for the presented token; only SignIn or RefreshToken recover.
    pub fn is_token_failure(&self) -> bool {
        matches!(self, AuthError::InvalidToken(_) | AuthError::TokenRevoked)
    }
}
