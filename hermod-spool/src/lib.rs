//! Durable retry store: messages no hook could deliver are written to one
//! file each and periodically handed back to the transport until they are
//! delivered, fail permanently, or run out of attempts.

pub mod bounce;
pub mod config;
pub mod dns;
pub mod error;
pub mod id;
pub mod record;
pub mod store;
pub mod traits;

pub use bounce::NoticeBounce;
pub use config::{BouncePolicy, RetryConfig};
pub use dns::SubnetVerifier;
pub use error::{Result, SpoolError};
pub use record::RetryRecord;
pub use store::{RetryStore, ScanReport};
pub use traits::{BounceProducer, IpDomainVerifier, RetryTransport};
