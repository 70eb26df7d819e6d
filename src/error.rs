//! Error types for the context builder.

use std::time::Duration;

/// Failure surfaced by a source adapter.
///
/// Adapters own authentication and transport details; the core only ever
/// sees this small taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("credentials rejected, re-authentication required")]
    AuthInvalid,

    #[error("rate limited by source")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether the retry policy should attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_) | SourceError::RateLimited { .. })
    }
}

/// Failure of the similarity oracle. Any of these puts the merge engine into
/// exact-dedup-only mode for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error enum for the context builder library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("primary fetch of {id} from {source_name} failed: {error}")]
    PrimaryFetch {
        source_name: String,
        id: String,
        error: SourceError,
    },

    #[error("no adapter registered for source '{0}'")]
    UnknownSource(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("a run for {0} is already in flight")]
    Busy(String),

    #[error("{0} is not tracked")]
    NotTracked(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("illegal task transition: {0}")]
    InvalidTransition(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
