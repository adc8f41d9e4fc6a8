//! Storefront error types with HTTP status code mapping.
//!
//! [`ShopError`] is the single error type shared by the persistence,
//! service and API layers. Each variant maps to a numeric error code and an
//! HTTP status; the JSON body shape is described on [`ErrorResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2002,
///     "message": "conflict: order is not pending payment",
///     "details": "conflict"
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see the table on [`ShopError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Machine-readable reason for 409 responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Storefront error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category           | HTTP Status                 |
/// |-----------|--------------------|-----------------------------|
/// | 1000–1999 | Validation         | 400 Bad Request / 403       |
/// | 2000–2999 | State / Not Found  | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server             | 500 Internal Server Error   |
/// | 4000–4999 | Collaborator       | 500 Internal Server Error   |
#[derive(Debug, thiserror::Error)]
pub enum ShopError {
    /// A required row is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint or business guard rejected the request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller-supplied data violated a static invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A wallet adjustment would leave a negative balance.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// A pending or running resize task already exists for the VPS.
    #[error("resize already in progress for vps {0}")]
    ResizeInProgress(i64),

    /// The caller may not perform this action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Collaborator failure that may succeed on a later attempt.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Collaborator failure that will not succeed on retry.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Collaborator reports the operation is still running.
    #[error("in progress: {0}")]
    InProgress(String),

    /// A composite did not finish within the caller-supplied timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Unclassified driver error, surfaced unchanged.
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ShopError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Database(other),
        }
    }
}

impl ShopError {
    /// Returns `true` when the error is a unique-index violation reported by
    /// the database driver.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    /// Returns `true` for errors a background worker should retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Retryable(_) | Self::InProgress(_) | Self::Timeout(_) | Self::Database(_)
        )
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidInput(_) => 1001,
            Self::Forbidden(_) => 1002,
            Self::Serialization(_) => 1003,
            Self::NotFound(_) => 2001,
            Self::Conflict(_) => 2002,
            Self::InsufficientBalance => 2003,
            Self::ResizeInProgress(_) => 2004,
            Self::Internal(_) => 3000,
            Self::Database(_) => 3001,
            Self::Timeout(_) => 3002,
            Self::Retryable(_) => 4001,
            Self::Fatal(_) => 4002,
            Self::InProgress(_) => 4003,
        }
    }

    /// Machine-readable reason attached to 409 responses.
    #[must_use]
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Conflict(_) => Some("conflict"),
            Self::InsufficientBalance => Some("insufficient_balance"),
            Self::ResizeInProgress(_) => Some("resize_in_progress"),
            other if other.is_unique_violation() => Some("duplicate"),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InsufficientBalance | Self::ResizeInProgress(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidInput(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            other if other.is_unique_violation() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShopError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: self.reason().map(str::to_string),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Shorthand result alias used across the crate.
pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_becomes_not_found() {
        let err = ShopError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, ShopError::NotFound(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_kinds_map_to_409_with_reason() {
        let cases = [
            (ShopError::Conflict("dup".to_string()), "conflict"),
            (ShopError::InsufficientBalance, "insufficient_balance"),
            (ShopError::ResizeInProgress(7), "resize_in_progress"),
        ];
        for (err, reason) in cases {
            assert_eq!(err.status_code(), StatusCode::CONFLICT);
            assert_eq!(err.reason(), Some(reason));
        }
    }

    #[test]
    fn invalid_input_maps_to_400() {
        let err = ShopError::InvalidInput("qty".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), 1001);
    }

    #[test]
    fn collaborator_errors_are_500() {
        assert_eq!(
            ShopError::Fatal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(ShopError::Retryable("later".to_string()).is_transient());
        assert!(!ShopError::Fatal("boom".to_string()).is_transient());
    }

    #[test]
    fn pool_timeout_is_not_unique_violation() {
        let err = ShopError::from(sqlx::Error::PoolTimedOut);
        assert!(!err.is_unique_violation());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
