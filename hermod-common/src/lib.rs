pub mod context;
pub mod error;
pub mod logging;
pub mod mail;
pub mod traits;

pub use context::{BoundType, Control, Failure, FailureKind, MessageContext};
pub use mail::Mail;
pub use tracing;

/// Broadcast to the parts of the process that wait on the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
