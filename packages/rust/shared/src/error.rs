//! Error types for posterpress.
//!
//! Library crates use [`PosterPressError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all posterpress operations.
#[derive(Debug, thiserror::Error)]
pub enum PosterPressError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Job/template database error.
    #[error("database error: {0}")]
    Database(String),

    /// Object store error other than a missing object.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// The requested object does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// A job id passed to the queue does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The caller's claim on a job was requeued and possibly handed to
    /// another worker; its update was not applied.
    #[error("claim on job {job_id} is no longer held")]
    ClaimLost { job_id: String },

    /// Building a source archive failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed record, invalid key, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PosterPressError>;

impl PosterPressError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a not-found error for an object key.
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether an update was rejected because the claim had been lost.
    pub fn is_claim_lost(&self) -> bool {
        matches!(self, Self::ClaimLost { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PosterPressError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = PosterPressError::not_found("project-files", "projects/p1/poster/input.json");
        assert_eq!(
            err.to_string(),
            "object not found: project-files/projects/p1/poster/input.json"
        );
        assert!(err.is_not_found());
        assert!(!PosterPressError::Database("locked".into()).is_not_found());
    }
}
