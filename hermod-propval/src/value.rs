use std::fmt;

use crate::{error::PropValError, types::PropType};

/// A 128-bit class identifier. Ordering compares the fields in declaration
/// order, matching the on-wire GUID comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq: [u8; 2],
    pub node: [u8; 6],
}

impl Guid {
    /// Build from the 16-byte little-endian wire layout.
    #[must_use]
    pub const fn from_le_bytes(b: [u8; 16]) -> Self {
        Self {
            time_low: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            time_mid: u16::from_le_bytes([b[4], b[5]]),
            time_hi_and_version: u16::from_le_bytes([b[6], b[7]]),
            clock_seq: [b[8], b[9]],
            node: [b[10], b[11], b[12], b[13], b[14], b[15]],
        }
    }
}

/// A counted byte buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Binary(pub Vec<u8>);

impl Binary {
    /// The stored length (`cb`).
    #[must_use]
    pub fn cb(&self) -> u32 {
        u32::try_from(self.0.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Binary {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

/// Server entry id: either an opaque entry-id blob, or a
/// (folder, message, instance) triple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SvrEid {
    pub bin: Option<Binary>,
    pub folder_id: u64,
    pub message_id: u64,
    pub instance: u32,
}

/// Payloads owned by other codecs (restrictions, rule actions). The engine only
/// needs their wire size and a fallible deep copy.
pub trait Nested: fmt::Debug + Send + Sync {
    fn wire_size(&self) -> u32;

    /// # Errors
    ///
    /// [`PropValError::Alloc`] when the copy cannot be allocated.
    fn duplicate(&self) -> Result<Box<dyn Nested>, PropValError>;
}

/// A typed property value.
///
/// 8-bit and Unicode strings are kept as bytes: legacy stores hand out
/// strings that are not valid UTF-8, and the engine must carry them unchanged.
/// Both are NUL-terminated on the wire, so a NUL byte ends the string for
/// sizing and comparison.
#[derive(Debug)]
pub enum PropValue {
    /// A value whose type is only known at run time.
    Unspecified(Box<PropValue>),
    Short(u16),
    Long(u32),
    Error(u32),
    Float(f32),
    Double(f64),
    AppTime(f64),
    Boolean(bool),
    Currency(u64),
    I8(u64),
    SysTime(u64),
    String8(Vec<u8>),
    Unicode(Vec<u8>),
    Clsid(Guid),
    SvrEid(SvrEid),
    Restriction(Box<dyn Nested>),
    Actions(Box<dyn Nested>),
    Binary(Binary),
    Object(Binary),
    MvShort(Vec<u16>),
    MvLong(Vec<u32>),
    MvI8(Vec<u64>),
    MvString8(Vec<Vec<u8>>),
    MvUnicode(Vec<Vec<u8>>),
    MvClsid(Vec<Guid>),
    MvBinary(Vec<Binary>),
}

impl PropValue {
    pub fn string8(s: impl Into<Vec<u8>>) -> Self {
        Self::String8(s.into())
    }

    pub fn unicode(s: impl Into<Vec<u8>>) -> Self {
        Self::Unicode(s.into())
    }

    pub fn binary(b: impl Into<Vec<u8>>) -> Self {
        Self::Binary(Binary(b.into()))
    }

    #[must_use]
    pub const fn prop_type(&self) -> PropType {
        match self {
            Self::Unspecified(_) => PropType::Unspecified,
            Self::Short(_) => PropType::Short,
            Self::Long(_) => PropType::Long,
            Self::Error(_) => PropType::Error,
            Self::Float(_) => PropType::Float,
            Self::Double(_) => PropType::Double,
            Self::AppTime(_) => PropType::AppTime,
            Self::Boolean(_) => PropType::Boolean,
            Self::Currency(_) => PropType::Currency,
            Self::I8(_) => PropType::I8,
            Self::SysTime(_) => PropType::SysTime,
            Self::String8(_) => PropType::String8,
            Self::Unicode(_) => PropType::Unicode,
            Self::Clsid(_) => PropType::Clsid,
            Self::SvrEid(_) => PropType::SvrEid,
            Self::Restriction(_) => PropType::Restriction,
            Self::Actions(_) => PropType::Actions,
            Self::Binary(_) => PropType::Binary,
            Self::Object(_) => PropType::Object,
            Self::MvShort(_) => PropType::MvShort,
            Self::MvLong(_) => PropType::MvLong,
            Self::MvI8(_) => PropType::MvI8,
            Self::MvString8(_) => PropType::MvString8,
            Self::MvUnicode(_) => PropType::MvUnicode,
            Self::MvClsid(_) => PropType::MvClsid,
            Self::MvBinary(_) => PropType::MvBinary,
        }
    }
}

/// The bytes of a NUL-terminated string, up to (not including) the first NUL.
pub(crate) fn c_str(bytes: &[u8]) -> &[u8] {
    bytes
        .iter()
        .position(|b| *b == 0)
        .map_or(bytes, |end| &bytes[..end])
}
