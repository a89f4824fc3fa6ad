use std::time::SystemTime;

use crate::{context::MessageContext, error::DeferError};

/// Durable storage for messages no hook could deliver.
pub trait DeferredStore: Send + Sync {
    /// Persist `context` for a later delivery attempt, returning the record id.
    ///
    /// # Errors
    ///
    /// Fails if the record could not be written completely; no partial record
    /// is left behind.
    fn defer(&self, context: &MessageContext, arrival: SystemTime) -> Result<u64, DeferError>;
}
