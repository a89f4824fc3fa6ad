//! Accessors native plugins use to read and edit a [`MessageContext`].

use std::ffi::CStr;

use hermod_common::{BoundType, Failure, FailureKind, MessageContext};
use libc::c_char;

use crate::{chain::Throwable, string};

unsafe fn text<'a>(value: *const c_char) -> Option<&'a str> {
    if value.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(value) }.to_str().ok()
    }
}

/// The context behind a handle from `get_context`.
///
/// # Safety
///
/// `throwable` must be a live handle from `get_context`, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hermod_throwable_context(
    throwable: *mut Throwable,
) -> *mut MessageContext {
    unsafe { throwable.as_mut() }.map_or(std::ptr::null_mut(), |t| t.context_mut())
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_get_queue_id(context: &MessageContext) -> i32 {
    context.control.queue_id
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_get_bound_type(context: &MessageContext) -> i32 {
    context.control.bound_type.code()
}

/// Unknown codes are refused.
#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_set_bound_type(context: &mut MessageContext, code: i32) -> bool {
    BoundType::from_code(code).is_some_and(|bound| {
        context.control.bound_type = bound;
        true
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_is_spam(context: &MessageContext) -> bool {
    context.control.is_spam
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_set_spam(context: &mut MessageContext, spam: bool) {
    context.control.is_spam = spam;
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_need_bounce(context: &MessageContext) -> bool {
    context.control.need_bounce
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_set_need_bounce(context: &mut MessageContext, bounce: bool) {
    context.control.need_bounce = bounce;
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_get_from(context: &MessageContext) -> string::String {
    context.control.from.as_str().into()
}

/// # Safety
///
/// `from` must be NUL-terminated, or null for the null sender.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hermod_context_set_from(
    context: &mut MessageContext,
    from: *const c_char,
) -> bool {
    if from.is_null() {
        context.control.from.clear();
        return true;
    }

    match unsafe { text(from) } {
        Some(from) => {
            from.clone_into(&mut context.control.from);
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_get_recipients(context: &MessageContext) -> string::StringVector {
    context.control.recipients.as_slice().into()
}

/// # Safety
///
/// `rcpt` must be NUL-terminated, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hermod_context_add_recipient(
    context: &mut MessageContext,
    rcpt: *const c_char,
) -> bool {
    match unsafe { text(rcpt) } {
        Some(rcpt) if !rcpt.is_empty() => {
            context.control.recipients.push(rcpt.to_owned());
            true
        }
        _ => false,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_clear_recipients(context: &mut MessageContext) {
    context.control.recipients.clear();
}

/// The raw message. NUL bytes in the message are dropped.
#[unsafe(no_mangle)]
pub extern "C" fn hermod_context_get_mail(context: &MessageContext) -> string::String {
    if context.mail.is_empty() {
        string::String::default()
    } else {
        context.mail.as_bytes().into()
    }
}

/// Replace the message with `len` bytes at `data`. Input that does not parse
/// as a message is refused and leaves the context unchanged.
///
/// # Safety
///
/// `data` must point at `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hermod_context_set_mail(
    context: &mut MessageContext,
    data: *const u8,
    len: usize,
) -> bool {
    if data.is_null() {
        return false;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    match hermod_common::Mail::from_bytes(bytes) {
        Ok(mail) => {
            context.mail = mail;
            true
        }
        Err(_) => false,
    }
}

/// # Safety
///
/// `name` must be NUL-terminated, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hermod_context_get_header(
    context: &MessageContext,
    name: *const c_char,
) -> string::String {
    unsafe { text(name) }
        .and_then(|name| context.mail.header(name))
        .map_or_else(string::String::default, |value| value.as_str().into())
}

/// Record why delivery failed: 0 temporary, 1 no such user, anything else
/// permanent.
///
/// # Safety
///
/// `reason` and `remote_ip` must be NUL-terminated, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hermod_context_set_failure(
    context: &mut MessageContext,
    kind: i32,
    reason: *const c_char,
    remote_ip: *const c_char,
) {
    let kind = match kind {
        0 => FailureKind::Temporary,
        1 => FailureKind::NoSuchUser,
        _ => FailureKind::Permanent,
    };
    let mut failure = Failure::new(kind, unsafe { text(reason) }.unwrap_or_default());
    if let Some(ip) = unsafe { text(remote_ip) } {
        failure = failure.with_remote_ip(ip);
    }
    context.control.failure = Some(failure);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::ptr::null;

    use hermod_common::FailureKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn envelope_accessors() {
        let mut context = MessageContext::default();

        unsafe {
            assert!(hermod_context_set_from(&mut context, c"alice@example.com".as_ptr()));
            assert!(hermod_context_add_recipient(&mut context, c"bob@example.org".as_ptr()));
            assert!(!hermod_context_add_recipient(&mut context, c"".as_ptr()));
            assert!(!hermod_context_add_recipient(&mut context, null()));
        }
        assert_eq!(context.control.from, "alice@example.com");
        assert_eq!(context.control.recipients, vec!["bob@example.org".to_owned()]);

        let from = hermod_context_get_from(&context);
        assert_eq!(unsafe { CStr::from_ptr(from.data) }, c"alice@example.com");

        let rcpts = hermod_context_get_recipients(&context);
        assert_eq!(rcpts.len, 1);

        unsafe {
            assert!(hermod_context_set_from(&mut context, null()));
        }
        assert!(context.control.from.is_empty());
    }

    #[test]
    fn flags_and_bound_type() {
        let mut context = MessageContext::default();

        assert!(hermod_context_set_bound_type(&mut context, 1));
        assert_eq!(context.control.bound_type, BoundType::Inbound);
        assert!(!hermod_context_set_bound_type(&mut context, 99));
        assert_eq!(hermod_context_get_bound_type(&context), 1);

        hermod_context_set_spam(&mut context, true);
        hermod_context_set_need_bounce(&mut context, true);
        assert!(hermod_context_is_spam(&context));
        assert!(hermod_context_need_bounce(&context));
    }

    #[test]
    fn mail_accessors() {
        let mut context = MessageContext::default();
        let raw = b"Subject: hello\r\nX-Lasthop: 192.0.2.1\r\n\r\nbody";

        assert!(hermod_context_get_mail(&context).data.is_null());
        assert!(unsafe { hermod_context_set_mail(&mut context, raw.as_ptr(), raw.len()) });

        let header = unsafe { hermod_context_get_header(&context, c"X-Lasthop".as_ptr()) };
        assert_eq!(unsafe { CStr::from_ptr(header.data) }, c"192.0.2.1");

        let mail = hermod_context_get_mail(&context);
        assert_eq!(mail.len, raw.len());
    }

    #[test]
    fn failure_annotation() {
        let mut context = MessageContext::default();
        unsafe {
            hermod_context_set_failure(&mut context, 1, c"550 no such user".as_ptr(), c"192.0.2.7".as_ptr());
        }

        let failure = context.control.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::NoSuchUser);
        assert_eq!(failure.reason, "550 no such user");
        assert_eq!(failure.remote_ip.as_deref(), Some("192.0.2.7"));
    }

    #[test]
    fn throwable_handle() {
        let mut throwable = Throwable::new(3, Box::default());
        let context = unsafe { hermod_throwable_context(&raw mut throwable) };
        assert!(!context.is_null());
        assert!(unsafe { hermod_throwable_context(std::ptr::null_mut()) }.is_null());
    }
}
