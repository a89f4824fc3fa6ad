use std::{fmt::Write, time::SystemTime};

use chrono::{DateTime, Utc};
use hermod_common::{FailureKind, Mail, MessageContext, error::MailError};

use crate::traits::BounceProducer;

const fn bounce_type(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::NoSuchUser => "no-such-user",
        FailureKind::Temporary | FailureKind::Permanent => "response-error",
    }
}

/// A plain-text delivery failure notice.
#[derive(Debug, Clone)]
pub struct NoticeBounce {
    postmaster: String,
}

impl NoticeBounce {
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            postmaster: format!("postmaster@{domain}"),
        }
    }
}

impl BounceProducer for NoticeBounce {
    fn produce(
        &self,
        original: &MessageContext,
        arrival: SystemTime,
        kind: FailureKind,
        remote_ip: Option<&str>,
        reason: &str,
    ) -> Result<Mail, MailError> {
        let control = &original.control;
        let sent = DateTime::<Utc>::from(arrival).to_rfc2822();

        let mut text = String::new();
        // Writing into a String cannot fail.
        let _ = write!(
            text,
            "From: Mail Delivery System <{}>\r\n\
             To: <{}>\r\n\
             Subject: Undelivered Mail Returned to Sender\r\n\
             Date: {}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             X-Bounce-Type: {}\r\n\
             \r\n\
             Your message sent at {sent} could not be delivered to:\r\n\r\n",
            self.postmaster,
            control.from,
            Utc::now().to_rfc2822(),
            bounce_type(kind),
        );
        for rcpt in &control.recipients {
            let _ = write!(text, "    {rcpt}\r\n");
        }
        let _ = write!(text, "\r\nReason: {reason}\r\n");
        if let Some(ip) = remote_ip {
            let _ = write!(text, "Remote host: {ip}\r\n");
        }
        if let Some(subject) = original.mail.header("Subject") {
            let _ = write!(text, "Original subject: {subject}\r\n");
        }

        Mail::from_bytes(text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::time::{Duration, UNIX_EPOCH};

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn notice_is_a_parseable_message() {
        let mut original = MessageContext::default();
        original.control.from = "alice@example.com".into();
        original.control.recipients = vec!["bob@example.org".into()];
        original.mail = Mail::from_bytes(b"Subject: quarterly report\r\n\r\nhi").unwrap();

        let notice = NoticeBounce::new("mx.example.net")
            .produce(
                &original,
                UNIX_EPOCH + Duration::from_secs(1_700_000_000),
                FailureKind::NoSuchUser,
                Some("192.0.2.7"),
                "550 5.1.1 unknown user",
            )
            .unwrap();

        assert_eq!(notice.header("To").as_deref(), Some("<alice@example.com>"));
        assert_eq!(notice.header("X-Bounce-Type").as_deref(), Some("no-such-user"));
        let body = String::from_utf8_lossy(notice.as_bytes());
        assert!(body.contains("    bob@example.org\r\n"));
        assert!(body.contains("550 5.1.1 unknown user"));
        assert!(body.contains("Remote host: 192.0.2.7"));
        assert!(body.contains("Original subject: quarterly report"));
        assert!(body.contains("14 Nov 2023"));
    }
}
