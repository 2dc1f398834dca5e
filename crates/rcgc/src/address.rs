//! Allocation identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique [`Address`] issue. Zero is reserved for null.
static ADDRESS_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one tracked allocation.
///
/// Non-null addresses are issued from a process-wide monotonic counter, so
/// two allocations never share an address even across registries, and an
/// address is never handed out again after its record is collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u64);

impl Address {
    /// The null address. Never refers to backing storage.
    pub const NULL: Address = Address(0);

    /// Issue a fresh, never-before-seen address.
    pub(crate) fn next() -> Self {
        Self(ADDRESS_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw address value, e.g. one previously read with [`Address::raw`].
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is [`Address::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
