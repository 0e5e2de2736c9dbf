//! Adaptive batch sizing under a process-wide memory budget.
//!
//! Before a batch inference call, the caller clamps its batch size against
//! current resident memory: shrinking a batch costs a little throughput,
//! while an out-of-memory kill costs the whole process.

use tracing::warn;

/// Process-wide memory budget (default 4 GiB via
/// [`PipelineConfig`](crate::config::PipelineConfig)).
#[derive(Debug, Clone, Copy)]
pub struct MemoryBudget {
    budget_bytes: u64,
}

impl MemoryBudget {
    pub fn new(budget_bytes: u64) -> Self {
        Self { budget_bytes }
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Current resident set size, or `None` where the platform does not
    /// expose it. `/proc/self/statm` reports pages; 4 KiB pages assumed.
    pub fn resident_bytes() -> Option<u64> {
        #[cfg(target_os = "linux")]
        {
            const PAGE_SIZE: u64 = 4096;
            let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
            let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
            Some(resident_pages * PAGE_SIZE)
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    /// Shrinks `requested` when memory headroom is low. Never returns zero;
    /// unknown usage leaves the request untouched.
    pub fn clamp_batch(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        let Some(resident) = Self::resident_bytes() else {
            return requested;
        };

        if resident >= self.budget_bytes {
            warn!(
                resident,
                budget = self.budget_bytes,
                "Resident memory at or over budget, forcing minimum batch size"
            );
            return 1;
        }

        let headroom = self.budget_bytes - resident;
        // Under 10% headroom: quarter the batch. Under 25%: halve it.
        let clamped = if headroom.saturating_mul(10) < self.budget_bytes {
            (requested / 4).max(1)
        } else if headroom.saturating_mul(4) < self.budget_bytes {
            (requested / 2).max(1)
        } else {
            requested
        };

        if clamped < requested {
            warn!(
                requested,
                clamped,
                headroom,
                budget = self.budget_bytes,
                "Shrinking batch size under memory pressure"
            );
        }
        clamped
    }
}
