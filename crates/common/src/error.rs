//! Common error types shared across crates.

use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Message sent to callers for every 5xx caused by an internal failure.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// Message sent to callers when a backing dependency is unreachable.
pub const UNAVAILABLE_MESSAGE: &str = "service temporarily unavailable";

/// Top-level service error type.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::BadRequest`] → 400
/// - [`ServiceError::NotFound`] → 404
/// - [`ServiceError::Conflict`] → 409
/// - [`ServiceError::EncryptionFailure`] → 500
/// - [`ServiceError::Unavailable`] → 503
/// - [`ServiceError::Internal`] → 500
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was malformed or failed validation.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The addressed user, goal, or journal entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated (e.g. an email already registered).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored field failed to encrypt or decrypt.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// The database is unreachable or the pool is exhausted.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::BadRequest(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::EncryptionFailure(_) => 500,
            ServiceError::Unavailable(_) => 503,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::EncryptionFailure(_) | ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Body safe to return to callers.
    ///
    /// Server-side failures collapse to [`INTERNAL_MESSAGE`] or
    /// [`UNAVAILABLE_MESSAGE`]; their detail only goes to logs.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            ServiceError::BadRequest(m) | ServiceError::NotFound(m) | ServiceError::Conflict(m) => {
                m.as_str()
            }
            ServiceError::Unavailable(_) => UNAVAILABLE_MESSAGE,
            ServiceError::EncryptionFailure(_) | ServiceError::Internal(_) => INTERNAL_MESSAGE,
        };
        ErrorResponse::new(self.code(), message)
    }
}
