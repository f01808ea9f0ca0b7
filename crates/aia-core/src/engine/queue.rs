//! Per-node work queue
//!
//! A key is queued at most once. A key added while its task is in flight is
//! marked dirty and queued again when that task is done, so one node never
//! has two tasks running at the same time.

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    order: VecDeque<String>,
    queued: HashSet<String>,
    processing: HashSet<String>,
    dirty: HashSet<String>,
    failures: HashMap<String, u32>,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, key: &str) {
        if self.processing.contains(key) {
            self.dirty.insert(key.to_string());
            return;
        }
        if self.queued.insert(key.to_string()) {
            self.order.push_back(key.to_string());
        }
    }

    /// Next key to process, marking it in flight
    pub(crate) fn pop(&mut self) -> Option<String> {
        let key = self.order.pop_front()?;
        self.queued.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    /// Mark a popped key finished
    pub(crate) fn done(&mut self, key: &str) {
        self.processing.remove(key);
        if self.dirty.remove(key) {
            self.add(key);
        }
    }

    /// Clear the failure history of a key
    pub(crate) fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Count one more failure; returns the consecutive failure count
    pub(crate) fn record_failure(&mut self, key: &str) -> u32 {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.processing.len()
    }
}
