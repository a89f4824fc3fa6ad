//! On-disk layout of a retry record.
//!
//! All integers are little-endian:
//!
//! | field      | encoding                                  |
//! |------------|-------------------------------------------|
//! | completion | `i32`, 0 while being written, then the number of delivery attempts so far |
//! | arrival    | `i64` seconds since the Unix epoch        |
//! | mail       | `i32` length followed by the raw message  |
//! | queue id   | `i32`                                     |
//! | bound type | `i32`                                     |
//! | spam       | `u8`                                      |
//! | bounce     | `u8`                                      |
//! | from       | NUL-terminated                            |
//! | recipients | each NUL-terminated, then a single NUL    |

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hermod_common::{BoundType, Mail, MessageContext};

use crate::error::{Result, SpoolError};

/// Size of the completion marker at the start of every record.
pub const MARKER_LEN: usize = size_of::<i32>();

/// Marker value of a record whose write has not finished.
pub const IN_PROGRESS: i32 = 0;

/// A decoded record.
#[derive(Debug, Clone)]
pub struct RetryRecord {
    /// Delivery attempts made so far, starting at 1 once written.
    pub times: i32,
    pub arrival: SystemTime,
    pub context: MessageContext,
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs()).map_or(i64::MIN, |s| -s),
    }
}

fn from_unix_seconds(seconds: i64) -> SystemTime {
    let offset = Duration::from_secs(seconds.unsigned_abs());
    if seconds >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    }
}

fn push_cstr(out: &mut Vec<u8>, value: &str, what: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(SpoolError::Encoding(format!("{what} contains NUL")));
    }
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    Ok(())
}

/// Everything after the completion marker.
///
/// # Errors
///
/// [`SpoolError::Encoding`] if the envelope cannot be stored: an address
/// containing NUL, an empty recipient, or a message too large for the length
/// field.
pub fn encode_body(context: &MessageContext, arrival: SystemTime) -> Result<Vec<u8>> {
    let control = &context.control;
    let mail = context.mail.as_bytes();
    let mail_len = i32::try_from(mail.len())
        .map_err(|_| SpoolError::Encoding(format!("message of {} bytes is too large", mail.len())))?;

    let mut out = Vec::with_capacity(mail.len() + 64);
    out.extend_from_slice(&unix_seconds(arrival).to_le_bytes());
    out.extend_from_slice(&mail_len.to_le_bytes());
    out.extend_from_slice(mail);
    out.extend_from_slice(&control.queue_id.to_le_bytes());
    out.extend_from_slice(&control.bound_type.code().to_le_bytes());
    out.push(u8::from(control.is_spam));
    out.push(u8::from(control.need_bounce));

    push_cstr(&mut out, &control.from, "envelope sender")?;
    for rcpt in &control.recipients {
        if rcpt.is_empty() {
            return Err(SpoolError::Encoding("empty recipient".into()));
        }
        push_cstr(&mut out, rcpt, "recipient")?;
    }
    out.push(0);

    Ok(out)
}

/// The completion marker of a record, if the record is long enough to have
/// one.
#[must_use]
pub fn marker(bytes: &[u8]) -> Option<i32> {
    bytes
        .first_chunk::<MARKER_LEN>()
        .map(|marker| i32::from_le_bytes(*marker))
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(SpoolError::Truncated { field });
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let bytes = self.take(N, field)?;
        let mut array = [0; N];
        array.copy_from_slice(bytes);
        Ok(array)
    }

    fn i32(&mut self, field: &'static str) -> Result<i32> {
        self.array(field).map(i32::from_le_bytes)
    }

    fn i64(&mut self, field: &'static str) -> Result<i64> {
        self.array(field).map(i64::from_le_bytes)
    }

    fn flag(&mut self, field: &'static str) -> Result<bool> {
        self.array::<1>(field).map(|[b]| b != 0)
    }

    fn string(&mut self, field: &'static str) -> Result<String> {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(SpoolError::Truncated { field })?;
        let value = self.take(end, field)?;
        self.take(1, field)?;
        String::from_utf8(value.to_vec())
            .map_err(|err| SpoolError::Encoding(format!("{field} is not UTF-8: {err}")))
    }
}

/// Decode a complete record, marker included.
///
/// # Errors
///
/// [`SpoolError::Truncated`] if the record ends early, [`SpoolError::Mail`]
/// if the stored message does not parse, [`SpoolError::Encoding`] for an
/// unknown bound type or an address that is not UTF-8.
pub fn decode(bytes: &[u8]) -> Result<RetryRecord> {
    let mut reader = Reader { bytes };

    let times = reader.i32("completion marker")?;
    let arrival = from_unix_seconds(reader.i64("arrival time")?);

    let mail_len = reader.i32("message length")?;
    let mail_len = usize::try_from(mail_len)
        .map_err(|_| SpoolError::Encoding(format!("negative message length {mail_len}")))?;
    let mail = Mail::from_bytes(reader.take(mail_len, "message")?)?;

    let mut context = MessageContext {
        mail,
        ..MessageContext::default()
    };
    let control = &mut context.control;
    control.queue_id = reader.i32("queue id")?;
    let bound = reader.i32("bound type")?;
    control.bound_type = BoundType::from_code(bound)
        .ok_or_else(|| SpoolError::Encoding(format!("unknown bound type {bound}")))?;
    control.is_spam = reader.flag("spam flag")?;
    control.need_bounce = reader.flag("bounce flag")?;
    control.from = reader.string("envelope sender")?;

    loop {
        let rcpt = reader.string("recipients")?;
        if rcpt.is_empty() {
            break;
        }
        control.recipients.push(rcpt);
    }

    Ok(RetryRecord {
        times,
        arrival,
        context,
    })
}
