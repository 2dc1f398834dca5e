//! Reference model for registry refcounts.
//!
//! [`LeakLedger`] mirrors what a registry should hold: one entry per live
//! allocation with its expected handle count. Property tests drive the
//! ledger and the real registry with the same operations and compare.

use std::collections::BTreeMap;

/// Expected refcount per allocation key.
///
/// Keys are opaque `u64`s (a registry address's raw value, or any id the
/// test assigns). Entries whose count reaches zero are removed, matching
/// an eagerly collected registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeakLedger {
    refs: BTreeMap<u64, usize>,
    freed: usize,
}

impl LeakLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh allocation with one reference.
    pub fn track(&mut self, key: u64) {
        let previous = self.refs.insert(key, 1);
        assert!(previous.is_none(), "key {key} tracked twice");
    }

    /// Add a reference to `key`.
    pub fn retain(&mut self, key: u64) {
        *self.refs.entry(key).or_insert(0) += 1;
    }

    /// Drop a reference to `key`. Returns `true` if it was the last one.
    pub fn release(&mut self, key: u64) -> bool {
        let Some(count) = self.refs.get_mut(&key) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }
        self.refs.remove(&key);
        self.freed += 1;
        true
    }

    /// Expected refcount of `key`; 0 if untracked.
    pub fn count(&self, key: u64) -> usize {
        self.refs.get(&key).copied().unwrap_or(0)
    }

    /// Allocations still referenced.
    pub fn live(&self) -> usize {
        self.refs.len()
    }

    /// Sum of all expected refcounts.
    pub fn total_refs(&self) -> usize {
        self.refs.values().sum()
    }

    /// Allocations whose last reference was released.
    pub fn freed(&self) -> usize {
        self.freed
    }

    /// Tracked keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.refs.keys().copied()
    }
}
