use hermod_common::internal;

use crate::value::{Binary, PropValue, c_str};

/// Bytes a fixed-size GUID occupies on the wire.
const GUID_SIZE: u32 = 16;

/// Wire size of a server entry id without an entry-id blob:
/// flag byte + folder id + message id + instance.
const SVREID_SIZE: u32 = 21;

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn string8_size(s: &[u8]) -> u32 {
    count(c_str(s).len()).saturating_add(1)
}

/// Two bytes per character; strings that are not valid UTF-8 contribute
/// nothing.
fn unicode_size(s: &[u8]) -> u32 {
    std::str::from_utf8(c_str(s)).map_or_else(
        |e| {
            internal!(
                level = WARN,
                "Unicode property value is not valid UTF-8 ({e}), sizing as 0"
            );
            0
        },
        |s| count(s.chars().count()).saturating_mul(2),
    )
}

impl PropValue {
    /// Wire-encoded length of this value in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            Self::Unspecified(inner) => inner.size(),
            Self::Short(_) => 2,
            Self::Long(_) | Self::Error(_) | Self::Float(_) => 4,
            Self::Double(_) | Self::AppTime(_) => 8,
            Self::Boolean(_) => 1,
            Self::Currency(_) | Self::I8(_) | Self::SysTime(_) => 8,
            Self::String8(s) => string8_size(s),
            Self::Unicode(s) => unicode_size(s),
            Self::Clsid(_) => GUID_SIZE,
            Self::SvrEid(eid) => eid
                .bin
                .as_ref()
                .map_or(SVREID_SIZE, |bin| bin.cb().saturating_add(1)),
            Self::Restriction(nested) | Self::Actions(nested) => nested.wire_size(),
            Self::Binary(bin) | Self::Object(bin) => bin.cb(),
            Self::MvShort(v) => count(v.len()).saturating_mul(2),
            Self::MvLong(v) => count(v.len()).saturating_mul(4),
            Self::MvI8(v) => count(v.len()).saturating_mul(8),
            Self::MvString8(v) => v.iter().map(|s| string8_size(s)).fold(0, u32::saturating_add),
            Self::MvUnicode(v) => v.iter().map(|s| unicode_size(s)).fold(0, u32::saturating_add),
            Self::MvClsid(v) => count(v.len()).saturating_mul(GUID_SIZE),
            Self::MvBinary(v) => v.iter().map(Binary::cb).fold(0, u32::saturating_add),
        }
    }
}
