//! Workload generators and replay driver for benchmarking rcgc.
//!
//! - [`workload`]: deterministic handle-operation sequence from a seed
//! - [`replay`]: run a sequence against a fresh [`Heap`] and report
//!
//! The same seed always yields the same sequence, so benchmark runs and
//! regression tests compare like with like.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rcgc::{CollectorConfig, GcError, Heap, RegistryStats, TrackedPointer};

/// Largest array a workload allocates.
pub const MAX_ARRAY_LEN: usize = 32;

/// One handle operation. Slot indices are reduced modulo the number of
/// live handles at replay time; operations on an empty set are skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Track a single value.
    Alloc {
        /// Stored value.
        value: u64,
    },
    /// Track an array of `len` sequential values.
    AllocArray {
        /// Element count, `1..=MAX_ARRAY_LEN`.
        len: usize,
    },
    /// Clone a handle.
    Clone {
        /// Source slot.
        slot: usize,
    },
    /// Drop a handle.
    Drop {
        /// Slot to drop.
        slot: usize,
    },
    /// Reassign a handle to a fresh single value.
    Assign {
        /// Slot to reassign.
        slot: usize,
        /// New value.
        value: u64,
    },
    /// Make one handle share another's allocation.
    AssignFrom {
        /// Slot that is rebound.
        dst: usize,
        /// Slot that is shared.
        src: usize,
    },
    /// Sum a handle's elements through a cursor.
    Walk {
        /// Slot to walk.
        slot: usize,
    },
    /// Run a collection pass over the heap.
    Collect,
}

/// Generate `len` operations from `seed`.
///
/// The mix leans towards allocation and cloning so the live set grows,
/// with enough drops and reassignments to keep the collector busy.
pub fn workload(seed: u64, len: usize) -> Vec<Op> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ops = Vec::with_capacity(len);
    for _ in 0..len {
        let slot = rng.random_range(0..1024);
        let op = match rng.random_range(0..100u32) {
            0..=19 => Op::Alloc {
                value: rng.random(),
            },
            20..=29 => Op::AllocArray {
                len: rng.random_range(1..=MAX_ARRAY_LEN),
            },
            30..=49 => Op::Clone { slot },
            50..=69 => Op::Drop { slot },
            70..=79 => Op::Assign {
                slot,
                value: rng.random(),
            },
            80..=89 => Op::AssignFrom {
                dst: slot,
                src: rng.random_range(0..1024),
            },
            90..=97 => Op::Walk { slot },
            _ => Op::Collect,
        };
        ops.push(op);
    }
    ops
}

/// Outcome of a [`replay`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Registry counters after the final flush.
    pub stats: RegistryStats,
    /// Most handles alive at once.
    pub peak_handles: usize,
    /// Wrapping sum of every element visited by `Walk`.
    pub checksum: u64,
    /// Records still held when the workload ended, drained by the flush.
    pub drained: usize,
}

/// Replay `ops` against a fresh heap, then flush it.
pub fn replay(ops: &[Op], config: CollectorConfig) -> Result<ReplayReport, GcError> {
    let heap = Heap::with_config(config)?;
    let mut handles: Vec<TrackedPointer<u64>> = Vec::new();
    let mut report = ReplayReport::default();

    for op in ops {
        match *op {
            Op::Alloc { value } => handles.push(heap.alloc(value)?),
            Op::AllocArray { len } => {
                let values: Vec<u64> = (0..len as u64).collect();
                handles.push(heap.alloc_array(values)?);
            }
            Op::Clone { slot } if !handles.is_empty() => {
                let p = handles[slot % handles.len()].clone();
                handles.push(p);
            }
            Op::Drop { slot } if !handles.is_empty() => {
                drop(handles.swap_remove(slot % handles.len()));
            }
            Op::Assign { slot, value } if !handles.is_empty() => {
                let len = handles.len();
                handles[slot % len].assign_value(value)?;
            }
            Op::AssignFrom { dst, src } if !handles.is_empty() => {
                let len = handles.len();
                let rhs = handles[src % len].clone();
                handles[dst % len].assign_from(&rhs);
            }
            Op::Walk { slot } if !handles.is_empty() => {
                let mut cursor = handles[slot % handles.len()].begin();
                while !cursor.is_end() {
                    report.checksum = report.checksum.wrapping_add(*cursor.get()?);
                    cursor.step_forward()?;
                }
            }
            Op::Collect => {
                heap.collect();
            }
            _ => {}
        }
        report.peak_handles = report.peak_handles.max(handles.len());
    }

    report.drained = heap.shutdown();
    report.stats = heap.stats::<u64>().unwrap_or_default();
    Ok(report)
}
