//! Compaction: planning, execution, and background scheduling.

mod cancel;
mod change_set;
mod counters;
mod executor;
mod planner;
mod scheduler;

pub use cancel::CancellationToken;
pub use change_set::{ChangeKind, ChangeSet, TaskState};
pub use counters::{CompactionCounters, CompactionCountersSnapshot};
pub use executor::CompactionReport;
pub use planner::{CompactionPriority, PlanLimits, PlannedInputs, select_inputs};
pub use scheduler::{CompactionHandle, CompactionScheduler};

pub(crate) use change_set::BusyPortions;
