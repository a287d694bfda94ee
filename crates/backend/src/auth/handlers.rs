//! Authentication HTTP handlers.
//!
//! Each handler decodes the request, calls one `AuthEngine` operation and
//! encodes the result. All status mapping lives in `ApiError`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use shared_types::{
    AuthUserResponse, CredentialsRequest, RefreshRequest, SignUpResponse, TokenResponse,
};

use crate::error::ApiResult;
use crate::AppState;

use super::middleware::bearer_token;

/// Register a new user. Issues no tokens.
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SignUpResponse>)> {
    let Json(req) = payload?;
    let email = state.engine.sign_up(&req).await?;

    Ok((StatusCode::CREATED, Json(SignUpResponse { email })))
}

/// Exchange credentials for a fresh token pair.
pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Json(req) = payload?;
    let pair = state.engine.sign_in(&req).await?;

    Ok(Json(pair.into()))
}

/// Rotate the pair. The access token comes from `Authorization`, the refresh
/// token from the body.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let access_token = bearer_token(&headers)?;
    let Json(req) = payload?;

    let pair = state
        .engine
        .refresh_token(&access_token, &req.refresh_token)
        .await?;

    Ok(Json(pair.into()))
}

/// Revoke the session behind the bearer access token.
pub async fn revoke(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let access_token = bearer_token(&headers)?;
    state.engine.revoke_token(&access_token).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Get current authenticated user info.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<AuthUserResponse>> {
    let access_token = bearer_token(&headers)?;
    let claims = state.engine.authenticate(&access_token).await?;

    Ok(Json(AuthUserResponse { email: claims.sub }))
}
