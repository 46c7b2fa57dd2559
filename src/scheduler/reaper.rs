//! Stale job reclamation.
//!
//! A crash mid-call leaves jobs in `running` forever. The reaper returns
//! any job whose last update is older than the threshold to its queue, or
//! fails evaluation jobs that have no attempts left.

use std::time::Duration;

use crate::error::Result;
use crate::id::now_ms;
use crate::store::{ReclaimCounts, SharedStore, lock_store};

pub struct Reaper {
    store: SharedStore,
    stale_after: Duration,
}

impl Reaper {
    pub fn new(store: SharedStore, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    pub fn sweep(&self) -> Result<ReclaimCounts> {
        self.sweep_at(now_ms())
    }

    /// Sweep as if the clock read `now` (epoch ms).
    pub fn sweep_at(&self, now: i64) -> Result<ReclaimCounts> {
        let stale_before = now - self.stale_after.as_millis() as i64;
        let counts = lock_store(&self.store)?.reclaim_stale(stale_before)?;

        if counts != ReclaimCounts::default() {
            tracing::warn!(
                evaluation_requeued = counts.evaluation_requeued,
                evaluation_failed = counts.evaluation_failed,
                generation_requeued = counts.generation_requeued,
                "Reclaimed stale running jobs"
            );
        }
        Ok(counts)
    }
}
