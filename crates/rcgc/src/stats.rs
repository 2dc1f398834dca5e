//! Registry counters.
//!
//! [`RegistryStats`] is a snapshot of one registry's bookkeeping. The
//! registry keeps it current as records change, so reading it never needs
//! the records borrow. Gauges describe the current state; the rest are
//! cumulative since the registry was created.

/// Counters for a single [`Registry`](crate::Registry).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Records currently in the registry (gauge).
    pub records: usize,
    /// Sum of refcounts across all records (gauge).
    pub live_refs: usize,
    /// Highest record count ever observed.
    pub peak_records: usize,
    /// Records ever inserted, including null and orphan records.
    pub inserted: u64,
    /// Number of `collect()` invocations.
    pub collections: u64,
    /// Records removed by collection.
    pub freed_records: u64,
    /// Elements dropped by collection (array length, or 1 per object).
    pub freed_elements: u64,
    /// Refcount changes (retains and releases) that had to be queued
    /// because the registry was borrowed.
    pub deferred_changes: u64,
    /// Shutdown flushes performed.
    pub flushes: u64,
}

impl RegistryStats {
    /// Records inserted but not yet reclaimed.
    pub fn outstanding(&self) -> u64 {
        self.inserted - self.freed_records
    }
}
