use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all Strata operations.
///
/// Every layer of the storage core, from the pager up to the compaction
/// executor, reports failures through this enum. Variants carry enough
/// context to diagnose the failure without access to engine internals.
///
/// # Error Handling Strategy
///
/// Errors propagate upward with `?`. Only a small subset is meant to reach
/// the caller of the engine:
///
/// - [`Error::InvalidRange`] and [`Error::SchemaMismatch`] reject malformed
///   input before any state change.
/// - [`Error::Fetch`] is surfaced once the engine has exhausted its retry
///   budget for a cold portion read.
///
/// The remaining variants are either retried internally
/// ([`Error::CompactionConflict`]) or abort a single read/compaction and get
/// logged ([`Error::AmbiguousVersion`], [`Error::KeyRangeViolation`]).
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, so compaction workers can hand it
/// back to the submitting thread over a channel.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    ///
    /// Raised while encoding or decoding portion blobs, concatenating
    /// batches during a merge, or evaluating compute kernels.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter that is not covered by a more
    /// specific variant (e.g. an empty ingestion batch or an unknown
    /// projection column).
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Malformed key or snapshot range at portion creation.
    ///
    /// Raised when `min > max` for either the snapshot range or the key
    /// range. The portion store rejects the request before writing any blob.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// An ingestion batch (or engine schema definition) does not match the
    /// engine's fixed schema. The append is rejected with no state change.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Two visible rows share both their key and their commit snapshot.
    ///
    /// This can only happen when an upstream write path is corrupted; the
    /// read or compaction that encountered it is aborted.
    #[error("ambiguous version for key {key} at snapshot ({plan_step}, {tx_id})")]
    AmbiguousVersion {
        key: String,
        plan_step: u64,
        tx_id: u64,
    },

    /// Cold-storage read failure for a portion blob.
    ///
    /// Transient by nature: the engine retries with backoff before surfacing
    /// it. The portion set is never modified by a failed fetch.
    #[error("failed to fetch portion {portion_id}: {reason}")]
    Fetch { portion_id: u64, reason: String },

    /// An optimistic portion-set swap lost the race against a concurrent
    /// compaction that already retired one of the inputs.
    ///
    /// Callers replan instead of reporting this to users.
    #[error("compaction conflict: {0}")]
    CompactionConflict(String),

    /// A merged row lies outside the key range its source portion declared.
    ///
    /// Fatal to the compaction task; the live portion set is left untouched.
    #[error("key range violation in portion {portion_id}: {detail}")]
    KeyRangeViolation { portion_id: u64, detail: String },

    /// A cooperative cancellation request was observed before the task
    /// reached its commit point.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Storage key or entity not found.
    #[error("Storage key not found")]
    NotFound,

    /// Internal error indicating a bug or unexpected state.
    ///
    /// If you encounter this error, it likely indicates a bug that should be
    /// reported with reproduction steps.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create an [`Error::InvalidRange`] from any displayable value.
    #[inline]
    pub fn invalid_range<E: fmt::Display>(err: E) -> Self {
        Error::InvalidRange(err.to_string())
    }

    /// Create an [`Error::SchemaMismatch`] from any displayable value.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_result::Error;
    ///
    /// let err = Error::schema_mismatch("column `v` expected Utf8, got Int64");
    /// assert!(matches!(err, Error::SchemaMismatch(msg) if msg.contains("Utf8")));
    /// ```
    #[inline]
    pub fn schema_mismatch<E: fmt::Display>(err: E) -> Self {
        Error::SchemaMismatch(err.to_string())
    }

    /// Create an [`Error::Fetch`] for `portion_id`.
    #[inline]
    pub fn fetch<E: fmt::Display>(portion_id: u64, reason: E) -> Self {
        Error::Fetch {
            portion_id,
            reason: reason.to_string(),
        }
    }

    /// Whether the error is transient and worth retrying.
    ///
    /// ```
    /// use strata_result::Error;
    ///
    /// assert!(Error::fetch(7, "blob missing").is_transient());
    /// assert!(!Error::NotFound.is_transient());
    /// ```
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::CompactionConflict(_))
    }

    /// Whether the error reports corrupted stored data rather than a failed
    /// operation. These are always logged at error level.
    ///
    /// ```
    /// use strata_result::Error;
    ///
    /// let dup = Error::AmbiguousVersion { key: "(1)".into(), plan_step: 3, tx_id: 0 };
    /// assert!(dup.is_integrity_violation());
    /// assert!(!Error::fetch(7, "blob missing").is_integrity_violation());
    /// ```
    #[inline]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Error::AmbiguousVersion { .. } | Error::KeyRangeViolation { .. }
        )
    }
}
