//! Operator bearer-token middleware
//!
//! With auth disabled (or no validator configured) requests pass through.
//! Otherwise the `Authorization: Bearer <jwt>` header must validate against
//! the configured Azure AD tenant.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use super::ApiState;
use crate::error::PlatformError;

pub async fn require_operator(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, PlatformError> {
    let Some(validator) = &state.auth else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| PlatformError::Unauthorized("missing bearer token".into()))?;

    validator
        .validate(token)
        .await
        .map_err(|e| PlatformError::Unauthorized(e.to_string()))?;

    Ok(next.run(request).await)
}
