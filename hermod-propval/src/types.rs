use std::cmp::Ordering;

use crate::error::PropValError;

/// Property type codes, as they appear in the low word of a property tag.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropType {
    Unspecified = 0x0000,
    Short = 0x0002,
    Long = 0x0003,
    Float = 0x0004,
    Double = 0x0005,
    Currency = 0x0006,
    AppTime = 0x0007,
    Error = 0x000A,
    Boolean = 0x000B,
    Object = 0x000D,
    I8 = 0x0014,
    String8 = 0x001E,
    Unicode = 0x001F,
    SysTime = 0x0040,
    Clsid = 0x0048,
    SvrEid = 0x00FB,
    Restriction = 0x00FD,
    Actions = 0x00FE,
    Binary = 0x0102,
    MvShort = 0x1002,
    MvLong = 0x1003,
    MvI8 = 0x1014,
    MvString8 = 0x101E,
    MvUnicode = 0x101F,
    MvClsid = 0x1048,
    MvBinary = 0x1102,
}

impl PropType {
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn is_multi_value(self) -> bool {
        self.code() & 0x1000 != 0
    }
}

impl TryFrom<u16> for PropType {
    type Error = PropValError;

    fn try_from(code: u16) -> Result<Self, PropValError> {
        Ok(match code {
            0x0000 => Self::Unspecified,
            0x0002 => Self::Short,
            0x0003 => Self::Long,
            0x0004 => Self::Float,
            0x0005 => Self::Double,
            0x0006 => Self::Currency,
            0x0007 => Self::AppTime,
            0x000A => Self::Error,
            0x000B => Self::Boolean,
            0x000D => Self::Object,
            0x0014 => Self::I8,
            0x001E => Self::String8,
            0x001F => Self::Unicode,
            0x0040 => Self::SysTime,
            0x0048 => Self::Clsid,
            0x00FB => Self::SvrEid,
            0x00FD => Self::Restriction,
            0x00FE => Self::Actions,
            0x0102 => Self::Binary,
            0x1002 => Self::MvShort,
            0x1003 => Self::MvLong,
            0x1014 => Self::MvI8,
            0x101E => Self::MvString8,
            0x101F => Self::MvUnicode,
            0x1048 => Self::MvClsid,
            0x1102 => Self::MvBinary,
            other => return Err(PropValError::UnknownType(other)),
        })
    }
}

/// A 32-bit property tag: property id in the high word, type in the low word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropTag(pub u32);

impl PropTag {
    #[must_use]
    pub const fn new(id: u16, kind: PropType) -> Self {
        Self(((id as u32) << 16) | kind.code() as u32)
    }

    #[must_use]
    pub const fn id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[must_use]
    pub const fn type_code(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// # Errors
    ///
    /// Fails when the low word is not a known property type.
    pub fn prop_type(self) -> Result<PropType, PropValError> {
        PropType::try_from(self.type_code())
    }
}

/// Restriction relational operators.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Lt = 0,
    Le = 1,
    Gt = 2,
    Ge = 3,
    Eq = 4,
    Ne = 5,
}

impl RelOp {
    pub const ALL: [Self; 6] = [Self::Lt, Self::Le, Self::Gt, Self::Ge, Self::Eq, Self::Ne];
    pub const ORDERING: [Self; 4] = [Self::Lt, Self::Le, Self::Gt, Self::Ge];

    #[must_use]
    pub const fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq | Self::Ne)
    }

    /// Evaluate the operator against a total ordering result.
    #[must_use]
    pub const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering.is_lt(),
            Self::Le => ordering.is_le(),
            Self::Gt => ordering.is_gt(),
            Self::Ge => ordering.is_ge(),
            Self::Eq => ordering.is_eq(),
            Self::Ne => ordering.is_ne(),
        }
    }

    /// As [`RelOp::holds`], for partially ordered operands: unordered values
    /// (NaN) satisfy only `Ne`.
    #[must_use]
    pub const fn holds_partial(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            Some(ordering) => self.holds(ordering),
            None => matches!(self, Self::Ne),
        }
    }
}

impl TryFrom<u8> for RelOp {
    type Error = PropValError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|op| *op as u8 == code)
            .ok_or(PropValError::UnknownRelOp(code))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn tag_split() {
        let tag = PropTag::new(0x0037, PropType::Unicode);
        assert_eq!(tag.0, 0x0037_001F);
        assert_eq!(tag.id(), 0x0037);
        assert_eq!(tag.prop_type().unwrap(), PropType::Unicode);

        assert_eq!(
            PropTag(0x0037_0099).prop_type(),
            Err(PropValError::UnknownType(0x0099))
        );
    }

    #[test]
    fn type_codes_round_trip() {
        for code in 0..=0x1102_u16 {
            if let Ok(kind) = PropType::try_from(code) {
                assert_eq!(kind.code(), code);
            }
        }
        assert!(PropType::MvBinary.is_multi_value());
        assert!(!PropType::Binary.is_multi_value());
    }

    #[test]
    fn relop_codes() {
        assert_eq!(RelOp::try_from(4).unwrap(), RelOp::Eq);
        assert_eq!(RelOp::try_from(6), Err(PropValError::UnknownRelOp(6)));
        assert!(RelOp::Ge.is_ordering());
        assert!(!RelOp::Ne.is_ordering());
    }

    #[test]
    fn unordered_operands_only_differ() {
        for op in RelOp::ALL {
            assert_eq!(op.holds_partial(None), op == RelOp::Ne);
        }
    }
}
