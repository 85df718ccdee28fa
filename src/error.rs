//! Error taxonomy for the service.
//!
//! Errors are classified by how they surface:
//! - Validation/Auth/NotFound: immediate 4xx, no state change
//! - Upstream: retried with backoff inside an ingest run, then audited
//! - Conflict: retried once, then surfaced
//! - Db/Integrity/Io: operator-facing 5xx with redacted context

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing or invalid admin token")]
    Auth,

    #[error("missing or invalid CSRF token")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("conflicting concurrent write: {0}")]
    Conflict(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for transient failures worth retrying inside a run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Upstream(_) | AppError::Conflict(_))
    }

    /// HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Auth => 401,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::Upstream(_) => 502,
            AppError::Integrity(_) | AppError::Db(_) | AppError::Io(_) => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
