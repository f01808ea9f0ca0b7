// # Leadership Status
//
// The reverse sweep must run on exactly one replica. Forward reconcile work is
// only dispatched by the elected replica, so having processed a reconcile task
// is itself proof of leadership; [`LeaderLatch`] records exactly that.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether this replica currently holds leadership
pub trait LeadershipStatus: Send + Sync {
    /// True if the sweep may run now
    fn is_leader(&self) -> bool;

    /// Called by the forward reconciler on every task it processes
    fn observe_reconcile(&self) {}
}

/// Latch that becomes leader once the first reconcile task is processed
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct LeaderLatch {
    latched: Arc<AtomicBool>,
}

impl LeaderLatch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeadershipStatus for LeaderLatch {
    fn is_leader(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    fn observe_reconcile(&self) {
        self.latched.store(true, Ordering::Release);
    }
}

/// Single-replica deployments without election
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysLeader;

impl LeadershipStatus for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_flips_on_first_reconcile() {
        let latch = LeaderLatch::new();
        let shared = latch.clone();
        assert!(!latch.is_leader());

        shared.observe_reconcile();
        assert!(latch.is_leader());
    }
}
