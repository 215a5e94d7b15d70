//! Error types for the identity mapping store

use std::path::PathBuf;

/// Errors raised while reading or mutating the mapping document
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error while reading or writing the document
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document on disk could not be decoded
    #[error("malformed identity document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Document could not be encoded
    #[error("failed to encode identity document: {0}")]
    Encode(#[source] serde_json::Error),

    /// Another writer changed the document between read and write
    #[error("concurrent modification of {path}: expected version {expected}, found {found}")]
    Conflict {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    /// Blocking write task was cancelled or panicked
    #[error("write task failed: {0}")]
    Task(String),

    /// Backend not reachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if the error is a lost optimistic-concurrency race
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
