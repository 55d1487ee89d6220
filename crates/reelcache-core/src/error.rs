//! Error types for reelcache core operations.
//!
//! Every variant except [`Error::InvalidArgument`] is a *soft* failure: the
//! cache converts it into a "play from the remote URL" fallback and never lets
//! it reach the playback layer.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reelcache core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller passed an unusable argument (e.g. an empty URL).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache directory could not be created, read, or modified.
    #[error("Cache storage unavailable at {path}: {reason}")]
    StorageUnavailable {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        reason: String,
    },

    /// A download finished without producing a usable file.
    #[error("Download incomplete for {url}: {reason}")]
    DownloadIncomplete {
        /// Remote URL that was being fetched.
        url: String,
        /// Error message.
        reason: String,
    },

    /// A delete issued by the eviction pass failed.
    #[error("Eviction failed for {path}: {reason}")]
    EvictionFailure {
        /// Path of the entry that could not be removed.
        path: PathBuf,
        /// Error message.
        reason: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a storage error from an I/O failure at `path`.
    pub fn storage(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Create a download error for `url`.
    pub fn download_incomplete(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DownloadIncomplete {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether the cache should swallow this error and fall back to remote playback.
    #[must_use]
    pub const fn is_soft(&self) -> bool {
        !matches!(self, Self::InvalidArgument(_))
    }
}
