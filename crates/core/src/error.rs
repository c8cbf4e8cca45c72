//! Error taxonomy for the fingerprinting and reconciliation engine

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias for the core crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Everything that can stop a snapshot build, a listing parse or a baseline decode.
///
/// Only [`SyncError::Codec`] is recoverable: a bad baseline degrades to a full
/// resync. Everything else aborts the run before any transfer happens.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory walk failed under {root}: {details}")]
    WalkFailed { root: PathBuf, details: String },

    #[error("malformed archive {path}: {details}")]
    MalformedArchive { path: PathBuf, details: String },

    #[error("entry {entry} is duplicated in archive {archive}")]
    DuplicateArchiveEntry { archive: String, entry: String },

    #[error("digest listing line {line_no} is malformed ({reason}): {line:?}")]
    MalformedDigestLine {
        line_no: usize,
        line: String,
        reason: &'static str,
    },

    #[error("archive listing for {archive} is malformed at line {line_no}: {details}")]
    MalformedArchiveListing {
        archive: String,
        line_no: usize,
        details: String,
    },

    #[error("invalid relative path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("snapshot codec failure: {details}")]
    Codec { details: String },

    #[error("configuration error in {path}: {details}")]
    Config { path: PathBuf, details: String },
}

impl SyncError {
    /// Wrap an I/O error with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the run may continue (by degrading to an empty baseline).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Codec { .. })
    }
}
