use thiserror::Error;

/// Failure reported by a [`Loader`](crate::store::Loader).
///
/// The message is kept verbatim: it is exactly what the lifecycle manager
/// stores in its `error` field while it waits to retry.
///
/// # Examples
///
/// ```
/// use docsync_core::error::LoadError;
///
/// let err = LoadError::new("connection refused");
/// assert_eq!(err.to_string(), "connection refused");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct LoadError(pub String);

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Failure reported by a [`Flusher`](crate::store::Flusher).
///
/// Like [`LoadError`], the message is stored verbatim in the coalescer's
/// `error` field until the next successful flush.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct FlushError(pub String);

impl FlushError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<std::io::Error> for FlushError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for FlushError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Errors surfaced by the handle API.
///
/// Load and flush failures never show up here: the state machines recover
/// from those on their own and expose them as data on their snapshots.
/// `SyncError` only reports that a message could not be delivered, or that
/// configuration could not be read.
///
/// # Examples
///
/// ```
/// use docsync_core::error::{SyncError, Result};
///
/// fn route(running: bool) -> Result<()> {
///     if !running {
///         return Err(SyncError::DocumentStopped {
///             href: "notes/today.md".into(),
///         });
///     }
///     Ok(())
/// }
///
/// assert!(route(false).is_err());
/// ```
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("coalescer for {href} has stopped")]
    CoalescerStopped { href: String },

    #[error("document {href} has stopped")]
    DocumentStopped { href: String },

    #[error("document {href} is not running (phase: {phase})")]
    NotRunning { href: String, phase: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for `Result<T, SyncError>`.
pub type Result<T> = std::result::Result<T, SyncError>;
