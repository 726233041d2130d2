//! Placement counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of an allocator's placement counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    /// Blocks handed out (including replacements made by reallocation)
    pub allocations: u64,
    /// Blocks released (including blocks replaced by reallocation)
    pub frees: u64,
    /// Reallocation calls with a non-null input
    pub reallocations: u64,
    /// Blocks placed on a specific node
    pub targeted: u64,
    /// Blocks served untargeted after candidates were tried or none applied
    pub fallbacks: u64,
    /// Individual node-targeted attempts that failed
    pub failed_attempts: u64,
}

impl AllocStats {
    /// Blocks currently outstanding according to the counters.
    #[must_use]
    pub fn live_blocks(&self) -> u64 {
        self.allocations.saturating_sub(self.frees)
    }
}

/// Live counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct PlacementStats {
    allocations: AtomicU64,
    frees: AtomicU64,
    reallocations: AtomicU64,
    targeted: AtomicU64,
    fallbacks: AtomicU64,
    failed_attempts: AtomicU64,
}

impl PlacementStats {
    pub(crate) fn record_allocation(&self, targeted: bool) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        if targeted {
            self.targeted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reallocation(&self) {
        self.reallocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> AllocStats {
        AllocStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            targeted: self.targeted.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }
}
