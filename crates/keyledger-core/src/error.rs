//! Error types for the store and the ledger.

use thiserror::Error;

/// Errors raised by a realtime-database backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure talking to the database.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The database answered with a non-success status.
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// A conditional write lost against a concurrent writer.
    #[error("precondition failed at '{0}'")]
    PreconditionFailed(String),

    /// A record could not be encoded or decoded.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A path segment contains characters the database does not accept.
    #[error("invalid path segment: {0:?}")]
    InvalidPath(String),

    /// The configured database URL is unusable.
    #[error("invalid database URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised by ledger, repository and access operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Validation(String),

    #[error("insufficient credits: have {available}, need {requested}")]
    InsufficientCredits { available: u64, requested: u64 },

    #[error("{0}")]
    Forbidden(String),

    /// Conditional writes kept losing against concurrent writers.
    #[error("too much contention on '{0}', try again")]
    Contention(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
