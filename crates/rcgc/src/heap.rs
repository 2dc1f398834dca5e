//! Heap scope: one registry per element type and the shutdown flush.
//!
//! A [`Heap`] owns the registries for every element type allocated through
//! it, created lazily on first use. Dropping the heap (or calling
//! [`Heap::shutdown`]) forces every armed registry's refcounts to zero and
//! collects once per type, so nothing allocated through the heap survives
//! the end of its scope. A registry already flushed and still empty is
//! skipped, so an explicit shutdown followed by the drop flushes once:
//!
//! ```
//! use rcgc::Heap;
//!
//! let heap = Heap::new();
//! let p = heap.alloc(19).unwrap();
//! let q = p.clone();
//! assert_eq!(p.refcount(), Ok(2));
//! assert_eq!(heap.record_count::<i32>(), 1);
//! drop((p, q));
//! assert_eq!(heap.record_count::<i32>(), 0);
//! ```

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::config::CollectorConfig;
use crate::error::GcError;
use crate::pointer::TrackedPointer;
use crate::record::Allocation;
use crate::registry::{Registry, SharedRegistry};
use crate::stats::RegistryStats;

/// Type-erased view of a [`Registry`], used by the heap to sweep every
/// element type without knowing it.
pub trait Sweep {
    /// Name of the element type.
    fn element_type(&self) -> &'static str;

    /// Records currently held.
    fn record_count(&self) -> usize;

    /// Whether a pointer has ever been bound to the registry.
    fn armed(&self) -> bool;

    /// Collect unreferenced records. See [`Registry::collect`].
    fn sweep(&self) -> bool;

    /// Force all refcounts to zero and collect. See [`Registry::shutdown`].
    fn flush(&self) -> usize;

    /// Counter snapshot.
    fn snapshot(&self) -> RegistryStats;
}

impl<T> Sweep for Registry<T> {
    fn element_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn record_count(&self) -> usize {
        self.len()
    }

    fn armed(&self) -> bool {
        self.is_armed()
    }

    fn sweep(&self) -> bool {
        self.collect()
    }

    fn flush(&self) -> usize {
        self.shutdown()
    }

    fn snapshot(&self) -> RegistryStats {
        self.stats()
    }
}

struct Slot {
    any: Rc<dyn Any>,
    sweep: Rc<dyn Sweep>,
}

/// Scope that owns the registries of every element type allocated in it.
pub struct Heap {
    config: CollectorConfig,
    /// Keyed by element type, in first-use order.
    registries: RefCell<IndexMap<TypeId, Slot>>,
}

impl Heap {
    /// A heap with the default configuration.
    pub fn new() -> Self {
        Self {
            config: CollectorConfig::default(),
            registries: RefCell::new(IndexMap::new()),
        }
    }

    /// A heap with a custom configuration.
    pub fn with_config(config: CollectorConfig) -> Result<Self, GcError> {
        config.validate()?;
        Ok(Self {
            config,
            registries: RefCell::new(IndexMap::new()),
        })
    }

    /// The configuration shared by every registry of this heap.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// The registry for `T`, created on first use.
    pub fn registry<T: 'static>(&self) -> SharedRegistry<T> {
        let key = TypeId::of::<T>();
        let mut registries = self.registries.borrow_mut();
        if let Some(slot) = registries.get(&key) {
            if let Ok(registry) = Rc::clone(&slot.any).downcast::<Registry<T>>() {
                return registry;
            }
        }
        let registry = Rc::new(Registry::<T>::with_valid_config(self.config.clone()));
        registries.insert(
            key,
            Slot {
                any: Rc::clone(&registry) as Rc<dyn Any>,
                sweep: Rc::clone(&registry) as Rc<dyn Sweep>,
            },
        );
        tracing::debug!(element = type_name::<T>(), "registry created");
        registry
    }

    /// Track `allocation` with declared arity `N`.
    pub fn track<T: 'static, const N: usize>(
        &self,
        allocation: impl Into<Allocation<T>>,
    ) -> Result<TrackedPointer<T, N>, GcError> {
        TrackedPointer::new(&self.registry::<T>(), allocation)
    }

    /// Track a single object.
    pub fn alloc<T: 'static>(&self, value: T) -> Result<TrackedPointer<T>, GcError> {
        self.track(Allocation::single(value))
    }

    /// Track an array whose length is only known at runtime.
    pub fn alloc_array<T: 'static>(
        &self,
        values: impl Into<Box<[T]>>,
    ) -> Result<TrackedPointer<T>, GcError> {
        self.track(Allocation::array(values))
    }

    /// A null pointer for `T`.
    pub fn null<T: 'static>(&self) -> TrackedPointer<T> {
        TrackedPointer::null(&self.registry::<T>())
    }

    /// Records held for `T`; 0 if `T` was never used.
    pub fn record_count<T: 'static>(&self) -> usize {
        self.existing::<T>().map_or(0, |registry| registry.record_count())
    }

    /// Counters for `T`'s registry, if one exists.
    pub fn stats<T: 'static>(&self) -> Option<RegistryStats> {
        self.existing::<T>().map(|registry| registry.snapshot())
    }

    /// Number of element types with a registry.
    pub fn type_count(&self) -> usize {
        self.registries.borrow().len()
    }

    /// `(element type, record count)` for every registry, in first-use order.
    pub fn summary(&self) -> Vec<(&'static str, usize)> {
        self.sweepers()
            .iter()
            .map(|registry| (registry.element_type(), registry.record_count()))
            .collect()
    }

    /// Collect every registry. Returns `true` if any storage was released.
    pub fn collect(&self) -> bool {
        self.sweepers()
            .iter()
            .fold(false, |freed, registry| registry.sweep() | freed)
    }

    /// Force every armed registry's refcounts to zero and collect it once,
    /// in first-use order. Returns the total number of records drained.
    ///
    /// Registries that were flushed before and have gained no records since
    /// are left alone, so repeated shutdowns are no-ops.
    pub fn shutdown(&self) -> usize {
        let mut drained = 0;
        for registry in self.sweepers() {
            if needs_flush(registry.as_ref()) {
                drained += registry.flush();
            }
        }
        if drained > 0 {
            tracing::debug!(drained, "heap shutdown flush complete");
        }
        drained
    }

    fn existing<T: 'static>(&self) -> Option<Rc<dyn Sweep>> {
        self.registries
            .borrow()
            .get(&TypeId::of::<T>())
            .map(|slot| Rc::clone(&slot.sweep))
    }

    /// Snapshot of the registry list, so sweeping runs without the map
    /// borrowed (element destructors may allocate through this heap).
    fn sweepers(&self) -> Vec<Rc<dyn Sweep>> {
        self.registries
            .borrow()
            .values()
            .map(|slot| Rc::clone(&slot.sweep))
            .collect()
    }
}

fn needs_flush(registry: &dyn Sweep) -> bool {
    registry.armed() && (registry.snapshot().flushes == 0 || registry.record_count() > 0)
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if self.config.flush_on_drop {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("registries", &self.summary())
            .finish()
    }
}
