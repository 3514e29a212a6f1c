//! Error types for the sync and cache manager.
//!
//! A single `SyncError` enum covers catalog, network, filesystem and
//! session-lifecycle failures. Per-artifact failures are projected onto the
//! small `FailureKind` taxonomy reported to the UI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote catalog could not be queried. Aborts the whole run; the
    /// UI surfaces this as a retryable banner.
    #[error("Catalog unavailable: {message}")]
    CatalogUnavailable { message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Disk full while writing {path:?}")]
    DiskFull { path: PathBuf },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A sync run is already scanning or downloading. Starts are rejected,
    /// never queued.
    #[error("A sync session is already active")]
    SessionBusy,

    /// Terminal, user-initiated. Not a failure and never logged as one.
    #[error("Sync cancelled")]
    Cancelled,
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Per-artifact failure taxonomy surfaced in reports and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient transport failure; the caller may retry the run.
    Network,
    /// Transferred bytes disagree with the catalog entry. Retrying is
    /// pointless until the catalog entry itself is refreshed.
    IntegrityMismatch,
    DiskFull,
    Write,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Network => "network",
            FailureKind::IntegrityMismatch => "integrity_mismatch",
            FailureKind::DiskFull => "disk_full",
            FailureKind::Write => "write",
        };
        write!(f, "{}", label)
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(std::time::Duration::from_secs(0))
        } else {
            SyncError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl SyncError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SyncError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify a write failure, separating out-of-space from other IO
    /// errors so the UI can tell the user to free disk rather than retry.
    pub fn write_error(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::StorageFull || err.raw_os_error() == Some(28) {
            SyncError::DiskFull { path }
        } else {
            SyncError::Io {
                message: err.to_string(),
                path: Some(path),
                source: Some(err),
            }
        }
    }

    /// Check if this error should trigger a retry of the whole run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::CatalogUnavailable { .. }
                | SyncError::Network { .. }
                | SyncError::Timeout(_)
                | SyncError::DownloadFailed { .. }
        )
    }

    /// Project a per-task error onto the reported failure taxonomy.
    ///
    /// Only called for errors produced inside a download task; `Cancelled`
    /// tasks are never recorded as failed.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::IntegrityMismatch { .. } => FailureKind::IntegrityMismatch,
            SyncError::DiskFull { .. } => FailureKind::DiskFull,
            SyncError::Io { .. } | SyncError::Json { .. } => FailureKind::Write,
            SyncError::Network { .. }
            | SyncError::Timeout(_)
            | SyncError::DownloadFailed { .. }
            | SyncError::CatalogUnavailable { .. } => FailureKind::Network,
            _ => FailureKind::Write,
        }
    }
}
