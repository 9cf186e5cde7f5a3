//! # Sync Errors
//!
//! Every failure a cycle or a handler can hit, with the status a handler
//! answers with:
//!
//! ```text
//! Unauthorized                                   401
//! Validation, InvalidPayload                     400  batch discarded
//! ConnectionFailed, Timeout, RemoteRejected      502  retried next cycle
//! config, checkpoint, database, internal         500
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use stockbridge_core::ValidationError;
use stockbridge_db::DbError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// This operation needs a setting that is absent.
    #[error("{0} not configured")]
    NotConfigured(&'static str),

    /// The config file exists but could not be read or parsed.
    #[error("Cannot read config: {0}")]
    ConfigLoadFailed(String),

    /// Missing or wrong `SyncToken` / `Bearer` credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The remote instance answered with a non-2xx status.
    #[error("Remote returned {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    /// Body is not valid JSON or not the expected shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A record broke a field rule; nothing from the batch was kept.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    /// `last_push` or `last_pull` could not be written.
    #[error("Checkpoint error: {0}")]
    CheckpointFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        if err.is_rejection() {
            SyncError::Validation(err.to_string())
        } else {
            SyncError::DatabaseError(err.to_string())
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::InvalidPayload(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::RemoteRejected {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Transport trouble that the next scheduled cycle may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) | SyncError::RemoteRejected { .. }
        )
    }

    /// Needs an operator to change settings before it can succeed.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::NotConfigured(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SyncError::Validation(_) | SyncError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) | SyncError::RemoteRejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// =============================================================================
// HTTP Mapping
// =============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockbridge_core::CoreError;

    #[test]
    fn test_only_transport_failures_retry() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout("30s".into()).is_retryable());
        assert!(SyncError::RemoteRejected { status: 503, body: String::new() }.is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::Unauthorized("bad token".into()).is_retryable());
        assert!(!SyncError::Validation("bad row".into()).is_retryable());
    }

    #[test]
    fn test_config_and_auth_predicates() {
        assert!(SyncError::NotConfigured("Remote URL").is_config_error());
        assert!(SyncError::Unauthorized("x".into()).is_auth_error());
        assert!(!SyncError::Internal("x".into()).is_auth_error());
    }

    #[test]
    fn test_handler_status_codes() {
        assert_eq!(SyncError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(SyncError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SyncError::InvalidPayload("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(SyncError::Timeout("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            SyncError::DatabaseError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_db_rejection_becomes_validation() {
        let err: SyncError = DbError::Domain(CoreError::ProductNotFound("123".into())).into();
        assert!(matches!(err, SyncError::Validation(_)));

        let err: SyncError = DbError::PoolExhausted.into();
        assert!(matches!(err, SyncError::DatabaseError(_)));
    }
}
