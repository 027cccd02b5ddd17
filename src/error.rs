//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds a host UI needs to distinguish (see
//! `CoreError::is_already_exists`): not-found is used internally for
//! tiered-lookup misses, already-exists is a non-fatal "skipped" result for
//! downloads, and everything else propagates unchanged to the caller.

use std::path::PathBuf;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists at {path}")]
    AlreadyExists { path: PathBuf },

    #[error("upstream refused: {0}")]
    RemoteRefused(String),

    #[error("transport error: {0}")]
    RemoteTransport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed cache entry: {0}")]
    Parse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cancelled")]
    Cancelled,
}

impl CoreError {
    /// True for the "skipped, not an error" case a host UI renders as success.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CoreError::AlreadyExists { .. })
    }

    pub fn already_exists(path: impl Into<PathBuf>) -> Self {
        CoreError::AlreadyExists { path: path.into() }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::RemoteTransport(format!("deadline exceeded: {err}"))
        } else if let Some(status) = err.status() {
            CoreError::RemoteRefused(format!("HTTP {status}"))
        } else {
            CoreError::RemoteTransport(err.to_string())
        }
    }
}
