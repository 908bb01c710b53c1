use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Boundary error type shared by all marketplace services.
///
/// Variants are broad transport-level classes; domain layers carry their own
/// specific error enums and convert into `AppError` at the service boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(anyhow::Error),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

/// Wire-friendly error body for whatever transport fronts the service.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    /// Status code equivalent for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller can fix this by changing the request (4xx-class).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Body safe to show an end user. Client errors carry the specific
    /// message; server errors get a generic retry-later message with the
    /// detail kept out of the response.
    pub fn to_response(&self) -> ErrorResponse {
        if self.is_client_error() {
            ErrorResponse {
                error: self.to_string(),
                details: None,
            }
        } else {
            ErrorResponse {
                error: "The operation could not be completed. Please retry later.".to_string(),
                details: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn client_errors_keep_their_message() {
        let err = AppError::BadRequest(anyhow!("cart is empty"));
        assert!(err.is_client_error());
        assert!(err.to_response().error.contains("cart is empty"));
    }

    #[test]
    fn server_errors_are_masked() {
        let err = AppError::DatabaseError(anyhow!("connection refused on 10.0.0.3"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_response().error.contains("10.0.0.3"));
    }
}
