use std::mem;

use crate::{
    error::PropValError,
    value::{Binary, PropValue, SvrEid},
};

/// Admission control for the allocations a duplicate performs.
///
/// Every owned buffer is admitted here before it is reserved, which lets
/// callers cap the memory a copy may use and lets tests inject failures at a
/// chosen depth.
pub trait AllocBudget {
    /// # Errors
    ///
    /// [`PropValError::Alloc`] to refuse the allocation.
    fn admit(&mut self, bytes: usize) -> Result<(), PropValError>;
}

/// Admits everything; only a real allocator failure aborts the copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct System;

impl AllocBudget for System {
    fn admit(&mut self, _bytes: usize) -> Result<(), PropValError> {
        Ok(())
    }
}

fn reserve<T>(budget: &mut impl AllocBudget, len: usize) -> Result<Vec<T>, PropValError> {
    budget.admit(len.saturating_mul(mem::size_of::<T>()))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| PropValError::Alloc)?;
    Ok(buf)
}

fn dup_slice<T: Copy>(budget: &mut impl AllocBudget, src: &[T]) -> Result<Vec<T>, PropValError> {
    let mut buf = reserve(budget, src.len())?;
    buf.extend_from_slice(src);
    Ok(buf)
}

fn dup_binary(budget: &mut impl AllocBudget, src: &Binary) -> Result<Binary, PropValError> {
    dup_slice(budget, &src.0).map(Binary)
}

/// Copy each element into a freshly reserved vector. An error part-way
/// through drops the already-copied prefix together with the vector.
fn dup_each<T, B: AllocBudget>(
    budget: &mut B,
    src: &[T],
    mut dup: impl FnMut(&mut B, &T) -> Result<T, PropValError>,
) -> Result<Vec<T>, PropValError> {
    let mut out = reserve(budget, src.len())?;
    for item in src {
        out.push(dup(budget, item)?);
    }
    Ok(out)
}

impl PropValue {
    /// Deep copy using the system allocator.
    ///
    /// # Errors
    ///
    /// [`PropValError::Alloc`] if any nested allocation fails; nothing
    /// allocated by this call is leaked.
    pub fn try_duplicate(&self) -> Result<Self, PropValError> {
        self.duplicate_with(&mut System)
    }

    /// Deep copy, admitting every allocation through `budget`.
    ///
    /// # Errors
    ///
    /// [`PropValError::Alloc`] if `budget` refuses an allocation or the
    /// allocator fails; nothing allocated by this call is leaked.
    pub fn duplicate_with(&self, budget: &mut impl AllocBudget) -> Result<Self, PropValError> {
        Ok(match self {
            Self::Unspecified(inner) => {
                budget.admit(mem::size_of::<Self>())?;
                Self::Unspecified(Box::new(inner.duplicate_with(budget)?))
            }
            Self::Short(v) => Self::Short(*v),
            Self::Long(v) => Self::Long(*v),
            Self::Error(v) => Self::Error(*v),
            Self::Float(v) => Self::Float(*v),
            Self::Double(v) => Self::Double(*v),
            Self::AppTime(v) => Self::AppTime(*v),
            Self::Boolean(v) => Self::Boolean(*v),
            Self::Currency(v) => Self::Currency(*v),
            Self::I8(v) => Self::I8(*v),
            Self::SysTime(v) => Self::SysTime(*v),
            Self::String8(s) => Self::String8(dup_slice(budget, s)?),
            Self::Unicode(s) => Self::Unicode(dup_slice(budget, s)?),
            Self::Clsid(guid) => Self::Clsid(*guid),
            Self::SvrEid(eid) => Self::SvrEid(SvrEid {
                bin: eid
                    .bin
                    .as_ref()
                    .map(|bin| dup_binary(budget, bin))
                    .transpose()?,
                ..*eid
            }),
            Self::Restriction(nested) => {
                budget.admit(nested.wire_size() as usize)?;
                Self::Restriction(nested.duplicate()?)
            }
            Self::Actions(nested) => {
                budget.admit(nested.wire_size() as usize)?;
                Self::Actions(nested.duplicate()?)
            }
            Self::Binary(bin) => Self::Binary(dup_binary(budget, bin)?),
            Self::Object(bin) => Self::Object(dup_binary(budget, bin)?),
            Self::MvShort(v) => Self::MvShort(dup_slice(budget, v)?),
            Self::MvLong(v) => Self::MvLong(dup_slice(budget, v)?),
            Self::MvI8(v) => Self::MvI8(dup_slice(budget, v)?),
            Self::MvString8(v) => Self::MvString8(dup_each(budget, v, |b, s| dup_slice(b, s))?),
            Self::MvUnicode(v) => Self::MvUnicode(dup_each(budget, v, |b, s| dup_slice(b, s))?),
            Self::MvClsid(v) => Self::MvClsid(dup_slice(budget, v)?),
            Self::MvBinary(v) => Self::MvBinary(dup_each(budget, v, |b, bin| dup_binary(b, bin))?),
        })
    }
}
