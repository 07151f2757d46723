use thiserror::Error;

/// Storage-specific errors surfaced by the time-series engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The disk holding the data path is full.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// Sample is older than the retention horizon plus the out-of-order window.
    #[error("sample for '{metric}' at {timestamp_ms}ms is outside the ingest window")]
    OutOfWindow { metric: String, timestamp_ms: i64 },

    /// Empty metric name, or a label the engine cannot encode.
    #[error("bad label: {0}")]
    BadLabel(String),

    /// Unknown metric or series.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied bad tags, time range, or duration string.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A persisted block that cannot be decoded. Not repaired on the hot
    /// path; surfaced to the caller.
    #[error("corrupted block {path}: {details}")]
    Corrupted { path: String, details: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classify an I/O error, separating disk-full from the rest.
    pub fn from_io(err: std::io::Error) -> Self {
        // ENOSPC
        if err.raw_os_error() == Some(28) {
            StorageError::StorageFull(err.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    pub fn corrupted(path: &std::path::Path, details: impl Into<String>) -> Self {
        StorageError::Corrupted {
            path: path.display().to_string(),
            details: details.into(),
        }
    }
}
