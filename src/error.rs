use std::path::PathBuf;

use thiserror::Error;

/// Failures of the detection and logging pipeline.
///
/// `DeviceUnavailable` and `CaptureFailure` end a session (after the camera is
/// released). `IoFailure` is local to one append and never aborts a session.
/// `NoData` is the aggregator's empty state, not a crash.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("camera {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("frame capture failed after {frames} frames: {reason}")]
    CaptureFailure { frames: u64, reason: String },

    #[error("violation log write failed: {0}")]
    IoFailure(#[from] StoreError),

    #[error("violation label {label:?} rejected: {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("no violation data in {store}")]
    NoData { store: String },

    #[error("a detection session is already running")]
    SessionActive,

    #[error("frame loop thread panicked")]
    LoopPanicked,
}

impl MonitorError {
    /// True when the error ends the current session rather than one frame.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            MonitorError::DeviceUnavailable { .. } | MonitorError::CaptureFailure { .. }
        )
    }
}

/// Event store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("event store database: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("event store {path} line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
