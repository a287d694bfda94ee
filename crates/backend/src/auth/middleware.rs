//! Request plumbing: bearer token extraction and per-request correlation ids.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::ApiError;

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

pub(crate) fn extract_token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|s| s.to_string())
}

/// The bearer token from `Authorization`, or `ApiError::MissingToken`.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    extract_token_from_header(headers).ok_or(ApiError::MissingToken)
}

/// Tag every request with a fresh correlation id.
///
/// The id is recorded on a `request` span that wraps the rest of the stack
/// and is echoed back in the `x-correlation-id` response header.
pub async fn correlation_id(request: Request<Body>, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        correlation_id = %correlation_id,
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}
