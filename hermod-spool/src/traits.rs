use std::time::SystemTime;

use hermod_common::{FailureKind, Mail, MessageContext, error::MailError};

/// The dispatch path deferred messages are handed back to.
pub trait RetryTransport: Send + Sync {
    /// Run `context` through the hook chain. Hooks that decline may leave a
    /// [`Failure`](hermod_common::Failure) on the context to say why.
    fn redeliver(&self, context: &mut MessageContext) -> bool;

    /// Queue a new message, such as a bounce, for delivery. Returns `false`
    /// if the transport has no room for it.
    fn inject(&self, context: MessageContext) -> bool;
}

/// Builds the notice sent back to the sender of an undeliverable message.
pub trait BounceProducer: Send + Sync {
    /// # Errors
    ///
    /// If the notice does not form a valid message.
    fn produce(
        &self,
        original: &MessageContext,
        arrival: SystemTime,
        kind: FailureKind,
        remote_ip: Option<&str>,
        reason: &str,
    ) -> Result<Mail, MailError>;
}

/// Checks that the host a message came from plausibly belongs to the
/// sender's domain.
pub trait IpDomainVerifier: Send + Sync {
    fn verify(&self, domain: &str, ip: &str) -> bool;
}

impl<F> IpDomainVerifier for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn verify(&self, domain: &str, ip: &str) -> bool {
        self(domain, ip)
    }
}
