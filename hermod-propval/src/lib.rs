//! Typed property values as exchanged over RPC and stored on disk.
//!
//! A [`PropValue`] carries its own type tag; the three core algorithms are
//! [`PropValue::size`] (wire-encoded length), [`PropValue::try_duplicate`]
//! (fallible deep copy) and [`PropValue::compare`] (restriction relational
//! operators). Releasing a value is ordinary ownership: dropping it frees every
//! nested allocation exactly once.

mod compare;
mod dup;
pub mod error;
mod size;
pub mod types;
pub mod value;

pub use dup::{AllocBudget, System};
pub use error::PropValError;
pub use types::{PropTag, PropType, RelOp};
pub use value::{Binary, Guid, Nested, PropValue, SvrEid};
