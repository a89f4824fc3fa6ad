use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::SpoolError;

mod defaults {
    use std::path::PathBuf;

    use super::BouncePolicy;

    pub(super) fn path() -> PathBuf {
        PathBuf::from("../cache")
    }

    pub(super) const fn scan_interval_secs() -> u64 {
        1800
    }

    pub(super) const fn max_retries() -> u32 {
        3
    }

    pub(super) const fn bounce_policy() -> BouncePolicy {
        BouncePolicy::Verify
    }
}

/// When an inbound message that failed permanently is bounced to its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BouncePolicy {
    /// Never bounce inbound messages.
    None,
    /// Always bounce.
    Always,
    /// Bounce only when the message's `X-Lasthop` address is consistent with
    /// the sender's domain, so forged senders are not backscattered.
    Verify,
}

/// Configuration for the retry store
///
/// ```ron
/// retry: (
///     path: "/var/lib/hermod/cache",
///     scan_interval_secs: 600,
///     max_retries: 5,
///     bounce_policy: Verify,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Directory holding one file per deferred message.
    #[serde(default = "defaults::path")]
    pub path: PathBuf,

    #[serde(default = "defaults::scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Delivery attempts after which a message is bounced and dropped.
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::bounce_policy")]
    pub bounce_policy: BouncePolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            path: defaults::path(),
            scan_interval_secs: defaults::scan_interval_secs(),
            max_retries: defaults::max_retries(),
            bounce_policy: defaults::bounce_policy(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// # Errors
    ///
    /// [`SpoolError::Validation`] if the path is empty, the scan interval is
    /// zero or no retry is allowed.
    pub fn validate(&self) -> Result<(), SpoolError> {
        if self.path.as_os_str().is_empty() {
            return Err(SpoolError::Validation("retry path is empty".into()));
        }

        if self.scan_interval_secs == 0 {
            return Err(SpoolError::Validation(
                "scan_interval_secs must be at least 1".into(),
            ));
        }

        if self.max_retries == 0 {
            return Err(SpoolError::Validation(
                "max_retries must be at least 1".into(),
            ));
        }

        Ok(())
    }
}
