//! Logical commit points used for MVCC visibility.
//!
//! A [`Snapshot`] is ordered purely structurally by `(plan_step, tx_id)`;
//! nothing here consults a wall clock, so replaying the same sequence of
//! commits always yields the same visibility decisions.

use bitcode::{Decode, Encode};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

/// Immutable, totally ordered identifier of a logical commit point.
///
/// All effects committed at or before a snapshot are visible to a reader
/// holding it. Field order matters: the derived `Ord` compares `plan_step`
/// first and `tx_id` second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct Snapshot {
    pub plan_step: u64,
    pub tx_id: u64,
}

impl Snapshot {
    /// The earliest possible commit point. Nothing committed is visible here
    /// except rows explicitly committed at `(0, 0)`.
    pub const MIN: Snapshot = Snapshot::new(0, 0);

    /// The latest possible commit point; every committed row is visible.
    pub const MAX: Snapshot = Snapshot::new(u64::MAX, u64::MAX);

    #[inline]
    pub const fn new(plan_step: u64, tx_id: u64) -> Self {
        Self { plan_step, tx_id }
    }

    /// Total order by `(plan_step, tx_id)`.
    #[inline]
    pub fn compare(&self, other: &Snapshot) -> Ordering {
        self.cmp(other)
    }

    /// Whether a row committed at `self` is visible to a reader at `read`.
    #[inline]
    pub fn is_visible_at(&self, read: Snapshot) -> bool {
        is_visible(*self, read)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.plan_step, self.tx_id)
    }
}

impl From<(u64, u64)> for Snapshot {
    fn from((plan_step, tx_id): (u64, u64)) -> Self {
        Snapshot::new(plan_step, tx_id)
    }
}

/// A row committed at `row_commit` is visible to a reader at `read` unless it
/// was committed strictly later.
#[inline]
pub fn is_visible(row_commit: Snapshot, read: Snapshot) -> bool {
    row_commit.compare(&read) != Ordering::Greater
}

#[derive(Debug)]
struct SnapshotClockInner {
    plan_step: AtomicU64,
    next_tx_id: AtomicU64,
    last_committed: Mutex<Snapshot>,
}

/// Monotonic allocator of commit snapshots.
///
/// Callers that do not receive commit points from an external coordinator
/// can use the clock to mint strictly increasing snapshots. Cloning the clock
/// shares its state.
#[derive(Clone, Debug)]
pub struct SnapshotClock {
    inner: Arc<SnapshotClockInner>,
}

impl SnapshotClock {
    /// Create a clock whose first plan step is `1`.
    pub fn new() -> Self {
        Self::with_initial_state(1, Snapshot::MIN)
    }

    /// Create a clock resuming after a persisted commit point.
    pub fn with_initial_state(plan_step: u64, last_committed: Snapshot) -> Self {
        Self {
            inner: Arc::new(SnapshotClockInner {
                plan_step: AtomicU64::new(plan_step.max(last_committed.plan_step)),
                next_tx_id: AtomicU64::new(last_committed.tx_id.saturating_add(1)),
                last_committed: Mutex::new(last_committed),
            }),
        }
    }

    /// Start a new plan step and return it.
    pub fn advance_plan_step(&self) -> u64 {
        self.inner.plan_step.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    /// Allocate the next snapshot inside the current plan step.
    ///
    /// Transaction ids are globally unique, so two snapshots handed out by
    /// the same clock never compare equal.
    pub fn next_snapshot(&self) -> Snapshot {
        let tx_id = self.inner.next_tx_id.fetch_add(1, AtomicOrdering::SeqCst);
        let plan_step = self.inner.plan_step.load(AtomicOrdering::SeqCst);
        Snapshot::new(plan_step, tx_id)
    }

    /// Record `snapshot` as committed, advancing the watermark if it is newer.
    pub fn mark_committed(&self, snapshot: Snapshot) {
        let mut guard = self
            .inner
            .last_committed
            .lock()
            .expect("snapshot clock lock poisoned");
        if snapshot > *guard {
            *guard = snapshot;
        }
    }

    /// The greatest committed snapshot (read watermark).
    pub fn last_committed(&self) -> Snapshot {
        *self
            .inner
            .last_committed
            .lock()
            .expect("snapshot clock lock poisoned")
    }
}

impl Default for SnapshotClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_step_dominates_tx_id() {
        let a = Snapshot::new(1, 900);
        let b = Snapshot::new(2, 0);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a), Ordering::Equal);
    }

    #[test]
    fn visibility_is_inclusive() {
        let commit = Snapshot::new(3, 7);
        assert!(is_visible(commit, Snapshot::new(3, 7)));
        assert!(is_visible(commit, Snapshot::new(3, 8)));
        assert!(is_visible(commit, Snapshot::new(4, 0)));
        assert!(!is_visible(commit, Snapshot::new(3, 6)));
        assert!(!is_visible(commit, Snapshot::MIN));
        assert!(commit.is_visible_at(Snapshot::MAX));
    }

    #[test]
    fn clock_hands_out_increasing_snapshots() {
        let clock = SnapshotClock::new();
        let s1 = clock.next_snapshot();
        let s2 = clock.next_snapshot();
        clock.advance_plan_step();
        let s3 = clock.next_snapshot();
        assert!(s1 < s2);
        assert!(s2 < s3);
        assert_eq!(s3.plan_step, s1.plan_step + 1);
    }

    #[test]
    fn clock_watermark_only_moves_forward() {
        let clock = SnapshotClock::new();
        clock.mark_committed(Snapshot::new(5, 1));
        clock.mark_committed(Snapshot::new(4, 9));
        assert_eq!(clock.last_committed(), Snapshot::new(5, 1));
    }

    #[test]
    fn clock_resumes_after_persisted_state() {
        let clock = SnapshotClock::with_initial_state(1, Snapshot::new(8, 41));
        let next = clock.next_snapshot();
        assert!(next > Snapshot::new(8, 41));
    }
}
