//! Error types for the progress store.
//!
//! All errors are propagated via [`StoreError`], which wraps the underlying
//! I/O and [`serde_json`] errors with the path that was being touched.

use std::path::PathBuf;

/// Errors that can occur while loading or flushing the progress store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading, writing or renaming the state file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The state file could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The state file was written by an incompatible format version.
    #[error("State file version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build reads and writes.
        expected: u32,
        /// Version found in the file.
        found: u32,
    },
}

impl StoreError {
    /// Build a closure that tags an I/O error with `path`.
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
