use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("{0} is already loaded")]
    AlreadyLoaded(String),

    #[error("Unable to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("{path} has no entry point {symbol}")]
    NoEntryPoint { path: String, symbol: &'static str },

    #[error("Init of {0} failed")]
    Init(String),

    #[error("No plugin named {0} is loaded")]
    NotFound(String),

    #[error("{0} owns the {1} delivery hook and cannot be unloaded")]
    OwnsTerminal(String, &'static str),

    #[error("There's no {0} delivery hook registered")]
    MissingTerminal(&'static str),
}

impl PluginError {
    /// The plugin never made it into the active list.
    #[must_use]
    pub const fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::AlreadyLoaded(_) | Self::Open { .. } | Self::NoEntryPoint { .. } | Self::Init(_)
        )
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Hook is already registered")]
    Duplicate,

    #[error("Hooks can only be registered while their plugin initialises")]
    NoLoadContext,

    #[error("A {0} delivery hook is already registered")]
    TerminalTaken(&'static str),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowError {
    #[error("Message loop detected: the hook is already throwing on this chain")]
    Loop,

    #[error("Exceeded the maximum depth a chain can throw")]
    Depth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failures_are_classified() {
        assert!(PluginError::AlreadyLoaded("a.so".into()).is_load_failure());
        assert!(PluginError::Init("a.so".into()).is_load_failure());
        assert!(!PluginError::NotFound("a.so".into()).is_load_failure());
        assert!(!PluginError::MissingTerminal("local").is_load_failure());
    }
}
