use std::time::SystemTime;

use hermod_common::{BoundType, MessageContext, error::MailError};

/// A message taken from the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Identifies the message to the queue; becomes the context's queue id.
    pub flush_id: i32,
    pub bound_type: BoundType,
    pub is_spam: bool,
    pub need_bounce: bool,
    pub from: String,
    pub recipients: Vec<String>,
    pub mail: Vec<u8>,
    pub arrival: SystemTime,
}

impl QueuedMessage {
    /// Load this message into `context`, replacing whatever it held.
    ///
    /// # Errors
    ///
    /// If the message does not parse; the envelope is loaded regardless.
    pub fn fill(&self, context: &mut MessageContext) -> Result<(), MailError> {
        context.clear();

        let control = &mut context.control;
        control.queue_id = self.flush_id;
        control.bound_type = self.bound_type;
        control.is_spam = self.is_spam;
        control.need_bounce = self.need_bounce;
        control.from.clone_from(&self.from);
        control.recipients.clone_from(&self.recipients);

        context.mail.retrieve(&self.mail)
    }
}

/// The durable queue messages arrive on.
pub trait MessageSource: Send + Sync {
    fn dequeue(&self) -> Option<QueuedMessage>;

    /// Keep a message no hook could deliver. Returns `false` if it could not
    /// be kept.
    fn save(&self, message: &QueuedMessage, context: &MessageContext) -> bool;

    /// The worker is done with `message`, whatever the outcome.
    fn release(&self, message: QueuedMessage);

    /// Whether messages are waiting, which lets the pool grow.
    fn holding(&self) -> bool;
}

/// For deployments where every message is created by plugins.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSource;

impl MessageSource for NoSource {
    fn dequeue(&self) -> Option<QueuedMessage> {
        None
    }

    fn save(&self, _message: &QueuedMessage, _context: &MessageContext) -> bool {
        false
    }

    fn release(&self, _message: QueuedMessage) {}

    fn holding(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fill_replaces_the_envelope() {
        let message = QueuedMessage {
            flush_id: 12,
            bound_type: BoundType::Relay,
            is_spam: true,
            need_bounce: true,
            from: "alice@example.com".into(),
            recipients: vec!["bob@example.org".into()],
            mail: b"Subject: hi\r\n\r\nbody".to_vec(),
            arrival: SystemTime::UNIX_EPOCH,
        };

        let mut context = MessageContext::default();
        context.control.recipients.push("stale@example.org".into());
        message.fill(&mut context).unwrap();

        assert_eq!(context.control.queue_id, 12);
        assert_eq!(context.control.bound_type, BoundType::Relay);
        assert!(context.control.is_spam);
        assert_eq!(context.control.recipients, vec!["bob@example.org".to_owned()]);
        assert_eq!(context.mail.header("Subject").as_deref(), Some("hi"));
    }
}
