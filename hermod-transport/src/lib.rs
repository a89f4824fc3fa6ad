//! The transport core: a pool of worker threads taking messages from the
//! durable queue, and from plugins, and running each through the hook chain.
//! Messages nothing delivers go to the retry store.

pub mod config;
pub mod error;
pub mod pool;
pub mod runtime;
pub mod source;
pub mod worker;

pub use config::TransportConfig;
pub use error::TransportError;
pub use pool::ContextPool;
pub use runtime::{Redelivery, TransportRuntime};
pub use source::{MessageSource, NoSource, QueuedMessage};
pub use worker::{MAX_TIMES_NOT_SERVED, SCAN_INTERVAL};
