use std::cmp::Ordering;

use crate::{
    types::RelOp,
    value::{PropValue, SvrEid, c_str},
};

/// ASCII case-insensitive comparison of two NUL-terminated strings.
fn strcasecmp(a: &[u8], b: &[u8]) -> Ordering {
    let a = c_str(a).iter().map(u8::to_ascii_lowercase);
    let b = c_str(b).iter().map(u8::to_ascii_lowercase);
    a.cmp(b)
}

/// Binary ordering compares only the common prefix. An empty operand sorts
/// below any non-empty one for `<`, satisfies `<=` unconditionally, and the
/// mirrored rules hold for `>` and `>=`.
fn compare_binary(relop: RelOp, a: &[u8], b: &[u8]) -> bool {
    let prefix = || {
        let common = a.len().min(b.len());
        a[..common].cmp(&b[..common])
    };

    match relop {
        RelOp::Lt => match (a.is_empty(), b.is_empty()) {
            (true, false) => true,
            (true, true) | (false, true) => false,
            (false, false) => prefix().is_lt(),
        },
        RelOp::Le => {
            if a.is_empty() {
                true
            } else if b.is_empty() {
                false
            } else {
                prefix().is_le()
            }
        }
        RelOp::Gt => match (a.is_empty(), b.is_empty()) {
            (false, true) => true,
            (true, true) | (true, false) => false,
            (false, false) => prefix().is_gt(),
        },
        RelOp::Ge => {
            if b.is_empty() {
                true
            } else if a.is_empty() {
                false
            } else {
                prefix().is_ge()
            }
        }
        RelOp::Eq => a == b,
        RelOp::Ne => a != b,
    }
}

/// An entry-id blob, when present, is the whole identity; otherwise the
/// (folder, message, instance) triple is.
fn svreid_eq(a: &SvrEid, b: &SvrEid) -> bool {
    match (&a.bin, &b.bin) {
        (Some(a), Some(b)) => a == b,
        (None, None) => {
            a.folder_id == b.folder_id && a.message_id == b.message_id && a.instance == b.instance
        }
        _ => false,
    }
}

fn strings_eq(a: &[Vec<u8>], b: &[Vec<u8>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| strcasecmp(a, b).is_eq())
}

/// Multi-value and entry-id types only define equality.
fn equality_only(relop: RelOp, equal: impl FnOnce() -> bool) -> bool {
    match relop {
        RelOp::Eq => equal(),
        RelOp::Ne => !equal(),
        _ => false,
    }
}

impl PropValue {
    /// Evaluate `self <relop> other`.
    ///
    /// Operands of different types never satisfy any operator. Restriction,
    /// rule-action and object values are not comparable and always yield
    /// `false`.
    #[must_use]
    pub fn compare(&self, relop: RelOp, other: &Self) -> bool {
        match (self, other) {
            (Self::Unspecified(a), Self::Unspecified(b)) => a.compare(relop, b),
            (Self::Short(a), Self::Short(b)) => relop.holds(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) | (Self::Error(a), Self::Error(b)) => {
                relop.holds(a.cmp(b))
            }
            (Self::Float(a), Self::Float(b)) => relop.holds_partial(a.partial_cmp(b)),
            (Self::Double(a), Self::Double(b)) | (Self::AppTime(a), Self::AppTime(b)) => {
                relop.holds_partial(a.partial_cmp(b))
            }
            (Self::Boolean(a), Self::Boolean(b)) => relop.holds(a.cmp(b)),
            (Self::Currency(a), Self::Currency(b))
            | (Self::I8(a), Self::I8(b))
            | (Self::SysTime(a), Self::SysTime(b)) => relop.holds(a.cmp(b)),
            (Self::String8(a), Self::String8(b)) | (Self::Unicode(a), Self::Unicode(b)) => {
                relop.holds(strcasecmp(a, b))
            }
            (Self::Clsid(a), Self::Clsid(b)) => relop.holds(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => compare_binary(relop, &a.0, &b.0),
            (Self::SvrEid(a), Self::SvrEid(b)) => equality_only(relop, || svreid_eq(a, b)),
            (Self::MvShort(a), Self::MvShort(b)) => equality_only(relop, || a == b),
            (Self::MvLong(a), Self::MvLong(b)) => equality_only(relop, || a == b),
            (Self::MvI8(a), Self::MvI8(b)) => equality_only(relop, || a == b),
            (Self::MvString8(a), Self::MvString8(b)) | (Self::MvUnicode(a), Self::MvUnicode(b)) => {
                equality_only(relop, || strings_eq(a, b))
            }
            (Self::MvClsid(a), Self::MvClsid(b)) => equality_only(relop, || a == b),
            (Self::MvBinary(a), Self::MvBinary(b)) => equality_only(relop, || a == b),
            _ => false,
        }
    }
}
