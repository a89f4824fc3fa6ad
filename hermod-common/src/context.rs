//! The unit of work moving through the dispatch chain: an envelope
//! ([`Control`]) and the message it describes ([`Mail`]).

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::mail::Mail;

/// At most this many recipients are rendered in a context's log summary.
const LOGGED_RECIPIENTS: usize = 8;

/// Origin/direction of a message.
///
/// The discriminants are persisted in retry records and handed to native
/// plugins, so they must not be renumbered.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BoundType {
    #[default]
    Unknown = 0,
    Inbound = 1,
    Outbound = 2,
    Relay = 3,
    SelfOriginated = 4,
}

impl BoundType {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Inbound),
            2 => Some(Self::Outbound),
            3 => Some(Self::Relay),
            4 => Some(Self::SelfOriginated),
            _ => None,
        }
    }

    /// Messages received over SMTP (as opposed to created by an application).
    #[must_use]
    pub const fn is_smtp(self) -> bool {
        matches!(self, Self::Inbound | Self::Outbound | Self::Relay)
    }
}

/// Why a hook declined a message. Hooks that return "unhandled" may leave one
/// of these on the context so the retry path can decide between retrying and
/// bouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Temporary,
    NoSuchUser,
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub remote_ip: Option<String>,
    pub reason: String,
}

impl Failure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            remote_ip: None,
            reason: reason.into(),
        }
    }

    pub fn temporary(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Temporary, reason)
    }

    pub fn no_such_user(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::NoSuchUser, reason)
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, reason)
    }

    #[must_use]
    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = Some(ip.into());
        self
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self.kind, FailureKind::Temporary)
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote_ip {
            Some(ip) => write!(f, "{:?} from {ip}: {}", self.kind, self.reason),
            None => write!(f, "{:?}: {}", self.kind, self.reason),
        }
    }
}

/// Envelope of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Control {
    pub queue_id: i32,
    pub bound_type: BoundType,
    pub is_spam: bool,
    pub need_bounce: bool,
    pub from: String,
    pub recipients: Vec<String>,
    pub failure: Option<Failure>,
}

impl Control {
    /// Reset every field, keeping the recipient list's allocation.
    pub fn reset(&mut self) {
        self.queue_id = 0;
        self.bound_type = BoundType::Unknown;
        self.is_spam = false;
        self.need_bounce = false;
        self.from.clear();
        self.recipients.clear();
        self.failure = None;
    }

    /// The domain part of the envelope sender, if it has one.
    pub fn from_domain(&self) -> Option<&str> {
        self.from
            .split_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub control: Control,
    pub mail: Mail,
}

impl MessageContext {
    /// Return the context to its pristine state without releasing buffers.
    pub fn clear(&mut self) {
        self.control.reset();
        self.mail.clear();
    }
}

/// `<origin> FROM: <from>, TO: <rcpt> <rcpt> ...`, as prefixed to every
/// per-message log line.
impl Display for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = &self.control;
        match control.bound_type {
            BoundType::Unknown => f.write_str("UNKNOWN message")?,
            BoundType::SelfOriginated => f.write_str("APP created message")?,
            _ => write!(f, "SMTP message queue-ID: {}", control.queue_id)?,
        }
        write!(f, ", FROM: {}, TO:", control.from)?;
        for rcpt in control.recipients.iter().take(LOGGED_RECIPIENTS) {
            write!(f, " {rcpt}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    fn context(bound_type: BoundType) -> MessageContext {
        let mut ctx = MessageContext::default();
        ctx.control.queue_id = 42;
        ctx.control.bound_type = bound_type;
        ctx.control.from = "alice@example.com".into();
        ctx.control.recipients = vec!["bob@example.org".into(), "carol@example.org".into()];
        ctx
    }

    #[test]
    fn bound_type_codes_round_trip() {
        for bound in [
            BoundType::Unknown,
            BoundType::Inbound,
            BoundType::Outbound,
            BoundType::Relay,
            BoundType::SelfOriginated,
        ] {
            assert_eq!(BoundType::from_code(bound.code()), Some(bound));
        }
        assert_eq!(BoundType::from_code(17), None);
    }

    #[test]
    fn summary_prefix_follows_bound_type() {
        assert_eq!(
            context(BoundType::Inbound).to_string(),
            "SMTP message queue-ID: 42, FROM: alice@example.com, TO: bob@example.org carol@example.org"
        );
        assert!(
            context(BoundType::SelfOriginated)
                .to_string()
                .starts_with("APP created message, FROM:")
        );
        assert!(
            context(BoundType::Unknown)
                .to_string()
                .starts_with("UNKNOWN message, FROM:")
        );
    }

    #[test]
    fn summary_caps_recipients() {
        let mut ctx = context(BoundType::Relay);
        ctx.control.recipients = (0..12).map(|i| format!("r{i}@example.org")).collect();

        let summary = ctx.to_string();
        assert!(summary.contains("r7@example.org"));
        assert!(!summary.contains("r8@example.org"));
    }

    #[test]
    fn clear_resets_envelope() {
        let mut ctx = context(BoundType::Outbound);
        ctx.control.is_spam = true;
        ctx.control.need_bounce = true;
        ctx.control.failure = Some(Failure::permanent("550 rejected"));
        ctx.mail.retrieve(b"Subject: hi\r\n\r\nbody").unwrap();

        ctx.clear();

        assert_eq!(ctx.control, Control::default());
        assert!(ctx.mail.is_empty());
    }

    #[test]
    fn from_domain() {
        let mut control = Control {
            from: "postmaster@example.net".into(),
            ..Control::default()
        };
        assert_eq!(control.from_domain(), Some("example.net"));

        control.from = "nobody".into();
        assert_eq!(control.from_domain(), None);

        control.from = "broken@".into();
        assert_eq!(control.from_domain(), None);
    }
}
