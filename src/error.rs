//! Error types for the transfer and sync core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type for every core operation
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors produced by the transfer and sync core
#[derive(Error, Debug)]
pub enum TransferError {
    /// Path resolves outside the caller's root directory
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Missing file, folder, or upload id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request data (bad chunk index, filename, batch entry)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Merge invariant violated although the part count matched
    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Assembly(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Assembly(_) => "ASSEMBLY_ERROR",
            Self::Io(_) => "IO_FAILURE",
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // IO details stay in the log, not in the response
        let message = match &self {
            TransferError::Io(e) => {
                tracing::error!("IO error: {}", e);
                "IO error".to_string()
            }
            TransferError::Assembly(msg) => {
                tracing::error!("Assembly error: {}", msg);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.code(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            TransferError::AccessDenied("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            TransferError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransferError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(
            TransferError::from(io).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::AccessDenied("x".into()).code(), "ACCESS_DENIED");
        assert_eq!(TransferError::Assembly("x".into()).code(), "ASSEMBLY_ERROR");
        let io = std::io::Error::other("disk full");
        assert_eq!(TransferError::from(io).code(), "IO_FAILURE");
    }
}
