//! Data model: condition trees, condition types and the definitions built on them.
//!
//! Persisted field names are camelCase (`typeId`, `roleTags`, `linkedItems`,
//! `windowDays`, ...).

mod condition;
mod condition_type;
mod definitions;

pub use condition::*;
pub use condition_type::*;
pub use definitions::*;
pub(crate) use definitions::default_true;
