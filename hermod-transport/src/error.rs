//! Typed errors for building and running the transport.

use std::io;

use hermod_ffi::PluginError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The configuration is inconsistent.
    #[error("Invalid transport configuration: {0}")]
    Config(String),

    /// A worker or scanner thread could not be created.
    #[error("Unable to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A plugin failed to load, or a required delivery hook is missing.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The runtime was started twice.
    #[error("Transport is already running")]
    AlreadyRunning,
}

impl TransportError {
    /// The configuration itself is invalid. Plugins that fail to load or
    /// leave a delivery hook missing are [`TransportError::Plugin`].
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
