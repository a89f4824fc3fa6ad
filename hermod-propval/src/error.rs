use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PropValError {
    /// An allocation could not be satisfied. Nothing allocated by the failing
    /// call outlives it.
    #[error("Allocation failed while duplicating property value")]
    Alloc,

    #[error("Unknown property type {0:#06x}")]
    UnknownType(u16),

    #[error("Unknown relational operator {0}")]
    UnknownRelOp(u8),
}

impl PropValError {
    #[must_use]
    pub const fn is_alloc(&self) -> bool {
        matches!(self, Self::Alloc)
    }
}
