//! Reference-counted tracked pointers over a per-type allocation registry.
//!
//! Every allocation handed to a [`TrackedPointer`] is recorded in the
//! [`Registry`] for its element type. Handles copy, reassign and drop by
//! adjusting the record's reference count; when a count reaches zero the
//! next collection pass frees the storage. Element access goes through
//! bounds-checked accessors and [`BoundedCursor`]s, never raw offsets.
//!
//! # Architecture
//!
//! ```text
//! Heap (scope, flushes on drop)
//! └── Registry<T> × element types (Rc-shared, lazily created)
//!     ├── IndexMap<Address, AllocationRecord<T>> (insertion order)
//!     │   └── Allocation<T> (Box<T> | Box<[T]>)
//!     ├── pending refcount changes (queued while a guard is live)
//!     └── RegistryStats (outside the records borrow)
//! TrackedPointer<T, N> ── Rc<Registry<T>> + Address
//! └── BoundedCursor<T> (index in [0, len], never touches refcounts)
//! ```
//!
//! # Collection policy
//!
//! - **Eager:** a release that drops a count to zero collects immediately.
//! - **Manual:** unreferenced records wait for [`Registry::collect`].
//!
//! Either way, [`Registry::shutdown`] (run by [`Heap`] on drop) forces all
//! counts to zero and reclaims everything, live handles included. Handles
//! that outlive the flush become inert: their accessors report
//! [`GcError::Dangling`] and their drops do nothing.
//!
//! # Safety
//!
//! Addresses are opaque ids, not machine pointers, and the registry owns
//! all storage. This crate contains no `unsafe` code.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod address;
pub mod config;
pub mod cursor;
pub mod error;
pub mod heap;
pub mod pointer;
pub mod record;
pub mod registry;
pub mod stats;

// Public re-exports for the primary API surface.
pub use address::Address;
pub use config::{CollectPolicy, CollectorConfig};
pub use cursor::{BoundedCursor, Values};
pub use error::GcError;
pub use heap::{Heap, Sweep};
pub use pointer::TrackedPointer;
pub use record::{Allocation, AllocationRecord, RecordInfo};
pub use registry::{ElementMut, ElementRef, Registry, RegistryDump, SharedRegistry};
pub use stats::RegistryStats;
