//! Identifiers shared across Strata crates.
//!
//! These live in `strata-types` so they can be reused without depending on
//! the storage-specific crates.

/// Unique identifier of a portion.
///
/// Allocated monotonically by the column engine and never reused, including
/// across reopen: the engine resumes allocation after the highest persisted
/// id.
pub type PortionId = u64;

/// Identifier of a compaction task, unique per engine instance.
pub type TaskId = u64;

/// Version of the engine schema a portion was written under.
pub type SchemaId = u32;

/// Sentinel for "no portion"; never handed out by the allocator.
pub const PORTION_ID_NONE: PortionId = 0;

/// First portion id the engine allocates.
pub const FIRST_PORTION_ID: PortionId = PORTION_ID_NONE + 1;
