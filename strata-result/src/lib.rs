//! Error types and result definitions for the Strata storage core.
//!
//! Every crate in the workspace reports failures through the single
//! [`Error`] enum and the [`Result<T>`] alias, so errors cross crate
//! boundaries with `?` and callers can match on specific variants.
//!
//! # Error Categories
//!
//! - **Input validation** ([`Error::InvalidRange`], [`Error::SchemaMismatch`],
//!   [`Error::InvalidArgumentError`]): rejected before any mutation.
//! - **Data integrity** ([`Error::AmbiguousVersion`], [`Error::KeyRangeViolation`]):
//!   upstream invariant violations; abort the read or compaction that saw them.
//! - **Storage** ([`Error::Fetch`], [`Error::Io`], [`Error::Arrow`], [`Error::NotFound`]).
//! - **Concurrency** ([`Error::CompactionConflict`], [`Error::Cancelled`]).
//! - **Internal errors** ([`Error::Internal`]): bugs or unexpected states.

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
