use std::{path::PathBuf, time::Duration};

use hermod_ffi::{Capacity, Identity};
use serde::Deserialize;

use crate::error::TransportError;

mod defaults {
    use std::path::PathBuf;

    pub(super) const fn threads_min() -> usize {
        4
    }

    pub(super) const fn threads_max() -> usize {
        32
    }

    pub(super) const fn free_contexts() -> usize {
        256
    }

    pub(super) const fn scan_interval_ms() -> u64 {
        1000
    }

    pub(super) fn plugin_dir() -> PathBuf {
        PathBuf::from("../mpc_plugins")
    }
}

/// Worker pool sizing, the plugins to load and what they are told about the
/// host.
///
/// ```ron
/// transport: (
///     threads_min: 4,
///     threads_max: 32,
///     plugin_dir: "/usr/lib/hermod",
///     plugins: ["local_delivery.so", "remote_delivery.so", "spam_filter.so"],
///     identity: (host_id: "mx1.example.com", default_domain: "example.com"),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// Workers created at startup and never retired.
    #[serde(default = "defaults::threads_min")]
    pub threads_min: usize,

    /// Upper bound the scanner grows the pool to under backlog.
    #[serde(default = "defaults::threads_max")]
    pub threads_max: usize,

    /// How long an idle worker waits for work, and how often the scanner
    /// checks the queue for a backlog.
    #[serde(default = "defaults::scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Contexts available to plugins for messages they create.
    #[serde(default = "defaults::free_contexts")]
    pub free_contexts: usize,

    /// Where plugins given without a directory are looked up.
    #[serde(default = "defaults::plugin_dir")]
    pub plugin_dir: PathBuf,

    /// Loaded in order at startup.
    #[serde(default)]
    pub plugins: Vec<String>,

    #[serde(default)]
    pub identity: Identity,

    #[serde(default)]
    pub domainlist_valid: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            threads_min: defaults::threads_min(),
            threads_max: defaults::threads_max(),
            scan_interval_ms: defaults::scan_interval_ms(),
            free_contexts: defaults::free_contexts(),
            plugin_dir: defaults::plugin_dir(),
            plugins: Vec::new(),
            identity: Identity::default(),
            domainlist_valid: false,
        }
    }
}

impl TransportConfig {
    /// # Errors
    ///
    /// [`TransportError::Config`] if there are no workers, the maximum is
    /// below the minimum or the scan interval is zero.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.threads_min == 0 {
            return Err(TransportError::Config("threads_min must be at least 1".into()));
        }

        if self.threads_max < self.threads_min {
            return Err(TransportError::Config(format!(
                "threads_max ({}) is below threads_min ({})",
                self.threads_max, self.threads_min
            )));
        }

        if self.scan_interval_ms == 0 {
            return Err(TransportError::Config("scan_interval_ms must be at least 1".into()));
        }

        Ok(())
    }

    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    #[must_use]
    pub const fn capacity(&self) -> Capacity {
        Capacity {
            threads_max: self.threads_max,
            free_contexts: self.free_contexts,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::worker::SCAN_INTERVAL;

    #[test]
    fn defaults() {
        let config: TransportConfig = ron::from_str("()").unwrap();

        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.threads_min, 4);
        assert_eq!(config.threads_max, 32);
        assert_eq!(config.free_contexts, 256);
        assert_eq!(config.scan_interval(), SCAN_INTERVAL);
        assert_eq!(config.plugin_dir, PathBuf::from("../mpc_plugins"));
        assert_eq!(config.identity.config_path, PathBuf::from("../config"));
        config.validate().unwrap();
    }

    #[test]
    fn identity_and_plugins() {
        let config: TransportConfig = ron::from_str(
            r#"(
                threads_max: 8,
                plugins: ["a.so", "b.so"],
                identity: (host_id: "mx1.example.com", queue_path: Some("/var/queue")),
            )"#,
        )
        .unwrap();

        assert_eq!(config.plugins, vec!["a.so".to_owned(), "b.so".to_owned()]);
        assert_eq!(config.identity.host_id, "mx1.example.com");
        assert_eq!(config.identity.queue_path, Some(PathBuf::from("/var/queue")));
        assert_eq!(
            config.capacity(),
            Capacity {
                threads_max: 8,
                free_contexts: 256
            }
        );
    }

    #[test]
    fn inconsistent_thread_bounds() {
        let config = TransportConfig {
            threads_min: 8,
            threads_max: 4,
            ..TransportConfig::default()
        };
        assert!(matches!(config.validate(), Err(TransportError::Config(_))));

        let none = TransportConfig {
            threads_min: 0,
            ..TransportConfig::default()
        };
        assert!(none.validate().is_err());

        let spinning = TransportConfig {
            scan_interval_ms: 0,
            ..TransportConfig::default()
        };
        assert!(matches!(spinning.validate(), Err(TransportError::Config(_))));
    }

    #[test]
    fn scan_interval_in_milliseconds() {
        let config: TransportConfig = ron::from_str("(scan_interval_ms: 25)").unwrap();
        assert_eq!(config.scan_interval(), Duration::from_millis(25));
        config.validate().unwrap();
    }
}
