use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strata_result::{Error, Result};

/// Cooperative cancellation flag shared between a task and its submitter.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail with `Cancelled` if cancellation was requested.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(format!("cancelled before {stage}")))
        } else {
            Ok(())
        }
    }
}
