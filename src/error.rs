//! Platform error type and HTTP mapping

use axum::http::StatusCode;

/// Errors surfaced by API handlers and services
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl PlatformError {
    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            PlatformError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
            PlatformError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PlatformError::Conflict(_) => StatusCode::CONFLICT,
            PlatformError::Database(_) | PlatformError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl axum::response::IntoResponse for PlatformError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {self:#}");
        }
        let body = axum::Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PlatformError::Unauthorized("missing key".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PlatformError::NotFound("agent".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PlatformError::Conflict("duplicate".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PlatformError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
