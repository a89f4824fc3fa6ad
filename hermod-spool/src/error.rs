//! Error types for the hermod-spool crate.

use std::io;

use hermod_common::error::{DeferError, MailError};
use thiserror::Error;

/// Top-level retry store error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record ended before the named field.
    #[error("Record truncated while reading {field}")]
    Truncated { field: &'static str },

    /// A field cannot be represented in, or read back from, a record.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The stored message does not parse.
    #[error("Stored message is malformed: {0}")]
    Mail(#[from] MailError),

    /// The DNS resolver could not be set up.
    #[error("DNS resolver error: {0}")]
    Dns(#[from] hickory_resolver::ResolveError),

    /// Retry store configuration or directory validation failed.
    #[error("Retry store validation error: {0}")]
    Validation(String),

    /// The background scan thread is already running.
    #[error("Retry store is already running")]
    AlreadyRunning,
}

impl SpoolError {
    /// Returns `true` if the record on disk can never be processed and should
    /// be discarded.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::Encoding(_) | Self::Mail(_)
        )
    }
}

impl From<SpoolError> for DeferError {
    fn from(err: SpoolError) -> Self {
        match err {
            SpoolError::Io(err) => Self::Io(err),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Specialized `Result` type for retry store operations.
pub type Result<T> = std::result::Result<T, SpoolError>;
