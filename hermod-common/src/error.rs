//! Error types shared between the transport and retry crates.

use std::io;

use thiserror::Error;

/// Errors loading message bytes into a [`Mail`](crate::Mail).
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Errors persisting an undeliverable message for later retry.
#[derive(Debug, Error)]
pub enum DeferError {
    #[error("I/O error while deferring message: {0}")]
    Io(#[from] io::Error),

    #[error("Message rejected by deferred store: {0}")]
    Rejected(String),
}

impl DeferError {
    /// Returns `true` if retrying the same write later might succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
