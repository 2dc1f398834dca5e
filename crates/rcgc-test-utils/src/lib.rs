//! Test utilities for rcgc development.
//!
//! Provides drop-counting element types ([`DropCounter`], [`Probe`]) for
//! asserting exactly when tracked storage is released, and a
//! [`LeakLedger`] reference model for checking registry refcounts against
//! an independent count.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod ledger;

pub use ledger::LeakLedger;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Shared tally of [`Probe`] creations and drops.
///
/// Cloning the counter shares the tally, so a test can keep one copy
/// while probes created from another are moved into tracked storage.
#[derive(Clone, Default)]
pub struct DropCounter {
    created: Rc<Cell<usize>>,
    dropped: Rc<Cell<usize>>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new probe reporting to this counter.
    pub fn probe(&self, id: u32) -> Probe {
        self.created.set(self.created.get() + 1);
        Probe {
            id,
            counter: self.clone(),
        }
    }

    /// `n` probes with ids `0..n`, for array allocations.
    pub fn probes(&self, n: u32) -> Vec<Probe> {
        (0..n).map(|id| self.probe(id)).collect()
    }

    /// Probes created so far (clones included).
    pub fn created(&self) -> usize {
        self.created.get()
    }

    /// Probes dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped.get()
    }

    /// Probes still alive.
    pub fn live(&self) -> usize {
        self.created() - self.dropped()
    }
}

impl fmt::Debug for DropCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropCounter")
            .field("created", &self.created())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Element type that reports its own drop to a [`DropCounter`].
pub struct Probe {
    id: u32,
    counter: DropCounter,
}

impl Probe {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Clone for Probe {
    fn clone(&self) -> Self {
        self.counter.probe(self.id)
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        let dropped = &self.counter.dropped;
        dropped.set(dropped.get() + 1);
    }
}

impl PartialEq for Probe {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Probe({})", self.id)
    }
}
