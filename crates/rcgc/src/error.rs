//! Collector error types.

use std::error::Error;
use std::fmt;

use crate::address::Address;

/// Errors that can occur while accessing or rebinding tracked pointers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GcError {
    /// A cursor or element index fell outside the allocation's extent.
    OutOfBounds {
        /// The offending index, relative to the start of the allocation.
        index: isize,
        /// Number of elements in the allocation.
        len: usize,
    },
    /// The address has no record in the registry (already collected or
    /// drained by a shutdown flush).
    Dangling {
        /// The address that could not be resolved.
        address: Address,
    },
    /// Element access through a null handle.
    NullPointer,
    /// An allocation's extent disagrees with the handle's declared arity.
    ExtentMismatch {
        /// Element count declared on the handle type.
        declared: usize,
        /// Element count of the offered allocation.
        actual: usize,
    },
    /// The registry is already borrowed by a conflicting element guard.
    Borrowed,
    /// A `CollectorConfig` failed validation.
    InvalidConfig {
        /// Description of which invariant was violated.
        reason: String,
    },
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for allocation of {len} elements")
            }
            Self::Dangling { address } => {
                write!(f, "dangling pointer: no record for address {address}")
            }
            Self::NullPointer => write!(f, "null pointer dereference"),
            Self::ExtentMismatch { declared, actual } => {
                write!(
                    f,
                    "extent mismatch: handle declares {declared} elements, allocation has {actual}"
                )
            }
            Self::Borrowed => write!(f, "registry is borrowed by a live element guard"),
            Self::InvalidConfig { reason } => write!(f, "invalid collector config: {reason}"),
        }
    }
}

impl Error for GcError {}
