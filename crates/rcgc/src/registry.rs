//! Per-type allocation registry and the collection sweep.
//!
//! A [`Registry`] holds one [`AllocationRecord`] per tracked address for a
//! single element type, in insertion order. Every
//! [`TrackedPointer`](crate::TrackedPointer) of that element type shares the
//! registry through an `Rc`, whatever its declared arity.
//!
//! # Borrowing
//!
//! Records live in a `RefCell`. Element guards ([`ElementRef`],
//! [`ElementMut`]) keep it borrowed, so a refcount change that arrives
//! while a guard is live (a handle dropped inside a `with_slice` closure,
//! say) cannot take the mutable borrow. Such changes are queued in
//! `pending` and applied as soon as the last guard is released, followed
//! by a collection under the eager policy. Drops therefore never panic on
//! a borrow conflict.
//!
//! Counters and the record count live outside the `RefCell` and can be read
//! at any time. Per-record queries ([`Registry::lookup`],
//! [`Registry::records`]) report [`GcError::Borrowed`] while a mutable guard
//! is live.
//!
//! # Collection
//!
//! [`Registry::collect`] removes every record whose refcount is zero and
//! releases the backing storage *after* the registry borrow has ended.
//! Element destructors may re-enter the registry (an element that itself
//! holds handles of the same type), and they observe a consistent registry
//! when they do.

use std::any::type_name;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::address::Address;
use crate::config::CollectorConfig;
use crate::error::GcError;
use crate::record::{Allocation, AllocationRecord, RecordInfo};
use crate::stats::RegistryStats;

/// Shared handle to a registry, as held by every tracked pointer.
pub type SharedRegistry<T> = Rc<Registry<T>>;

/// A refcount change that could not be applied because the records were
/// borrowed when it arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pending {
    Retain(Address),
    Release(Address),
}

struct Records<T> {
    map: IndexMap<Address, AllocationRecord<T>>,
}

impl<T> Records<T> {
    fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    fn insert(&mut self, record: AllocationRecord<T>, stats: &mut RegistryStats) {
        stats.live_refs += record.refcount;
        self.map.insert(record.address, record);
        stats.inserted += 1;
        stats.records = self.map.len();
        stats.peak_records = stats.peak_records.max(stats.records);
    }

    /// Increment the record for `address`, inserting an empty record with a
    /// single reference if the address is unknown.
    fn retain(&mut self, address: Address, stats: &mut RegistryStats) -> usize {
        if let Some(record) = self.map.get_mut(&address) {
            record.refcount += 1;
            stats.live_refs += 1;
            return record.refcount;
        }
        if !address.is_null() {
            tracing::warn!(
                %address,
                element = type_name::<T>(),
                "retain of untracked address; inserting orphan record"
            );
        }
        self.insert(AllocationRecord::new(address, None), stats);
        1
    }

    /// Decrement the record for `address`. Unknown addresses are a no-op.
    fn release(&mut self, address: Address, stats: &mut RegistryStats) -> Option<usize> {
        match self.map.get_mut(&address) {
            Some(record) => {
                if record.refcount > 0 {
                    record.refcount -= 1;
                    stats.live_refs -= 1;
                }
                Some(record.refcount)
            }
            None => {
                tracing::debug!(
                    %address,
                    element = type_name::<T>(),
                    "release of untracked address ignored"
                );
                None
            }
        }
    }

    /// Apply a queued change. Returns `true` if a release reached zero.
    fn apply(&mut self, op: Pending, stats: &mut RegistryStats) -> bool {
        match op {
            Pending::Retain(address) => {
                self.retain(address, stats);
                false
            }
            Pending::Release(address) => self.release(address, stats) == Some(0),
        }
    }

    /// Partition out every unreferenced record, preserving the order of the
    /// survivors.
    fn take_unreferenced(
        &mut self,
        stats: &mut RegistryStats,
    ) -> SmallVec<[AllocationRecord<T>; 4]> {
        let mut garbage = SmallVec::new();
        if !self.map.values().any(AllocationRecord::is_unreferenced) {
            return garbage;
        }
        let records = std::mem::take(&mut self.map);
        for (address, record) in records {
            if record.is_unreferenced() {
                stats.freed_records += 1;
                stats.freed_elements += record.extent() as u64;
                garbage.push(record);
            } else {
                self.map.insert(address, record);
            }
        }
        stats.records = self.map.len();
        garbage
    }

    fn resolve(&self, address: Address) -> Result<&Allocation<T>, GcError> {
        if address.is_null() {
            return Err(GcError::NullPointer);
        }
        self.map
            .get(&address)
            .and_then(|record| record.storage.as_ref())
            .ok_or(GcError::Dangling { address })
    }

    fn resolve_mut(&mut self, address: Address) -> Result<&mut Allocation<T>, GcError> {
        if address.is_null() {
            return Err(GcError::NullPointer);
        }
        self.map
            .get_mut(&address)
            .and_then(|record| record.storage.as_mut())
            .ok_or(GcError::Dangling { address })
    }
}

/// Allocation records for one element type.
pub struct Registry<T> {
    records: RefCell<Records<T>>,
    pending: RefCell<Vec<Pending>>,
    stats: Cell<RegistryStats>,
    armed: Cell<bool>,
    config: CollectorConfig,
}

impl<T> Registry<T> {
    /// Create an empty registry.
    pub fn new(config: CollectorConfig) -> Result<Self, GcError> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    /// Constructor for callers that already validated `config`.
    pub(crate) fn with_valid_config(config: CollectorConfig) -> Self {
        Self {
            records: RefCell::new(Records::new()),
            pending: RefCell::new(Vec::new()),
            stats: Cell::new(RegistryStats::default()),
            armed: Cell::new(false),
            config,
        }
    }

    /// Create an empty registry behind an `Rc`, ready to hand to pointers.
    pub fn new_shared(config: CollectorConfig) -> Result<SharedRegistry<T>, GcError> {
        Self::new(config).map(Rc::new)
    }

    /// The configuration this registry was created with.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Number of records, including the null record and orphans.
    ///
    /// Changes queued behind a live element guard are not counted until
    /// the guard is released.
    pub fn len(&self) -> usize {
        self.stats.get().records
    }

    /// Whether the registry holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata for the record at `address`, if any.
    pub fn lookup(&self, address: Address) -> Result<Option<RecordInfo>, GcError> {
        self.with_settled(|records| records.map.get(&address).map(AllocationRecord::info))
    }

    /// Whether a record exists for `address`.
    pub fn contains(&self, address: Address) -> Result<bool, GcError> {
        self.lookup(address).map(|info| info.is_some())
    }

    /// Metadata for every record, in insertion order.
    pub fn records(&self) -> Result<Vec<RecordInfo>, GcError> {
        self.with_settled(|records| records.map.values().map(AllocationRecord::info).collect())
    }

    /// Snapshot of this registry's counters.
    pub fn stats(&self) -> RegistryStats {
        self.stats.get()
    }

    /// Whether a tracked pointer has ever been bound to this registry, which
    /// enlists it in the owning heap's shutdown flush.
    pub fn is_armed(&self) -> bool {
        self.armed.get()
    }

    /// Mark the registry as used. Returns `true` only the first time.
    pub(crate) fn arm(&self) -> bool {
        !self.armed.replace(true)
    }

    /// Remove every unreferenced record and release its storage.
    ///
    /// Passes repeat until one removes nothing, so records that reach zero
    /// while earlier garbage is being dropped are reclaimed in the same
    /// call. Returns `true` iff at least one record with backing storage
    /// was released. Calling it again with nothing unreferenced returns
    /// `false` and leaves the registry unchanged.
    ///
    /// If a live element guard holds the registry borrowed, nothing can be
    /// removed and this returns `false`; the work happens when the guard is
    /// released.
    pub fn collect(&self) -> bool {
        let mut freed = false;
        let mut first_pass = true;
        loop {
            let garbage = {
                let Ok(mut records) = self.records.try_borrow_mut() else {
                    tracing::debug!(
                        element = type_name::<T>(),
                        "collect skipped: registry borrowed"
                    );
                    break;
                };
                self.tally(|stats| {
                    if first_pass {
                        stats.collections += 1;
                    }
                    self.settle(&mut records, stats);
                    records.take_unreferenced(stats)
                })
            };
            first_pass = false;
            if garbage.is_empty() {
                break;
            }
            let removed = garbage.len();
            let mut elements = 0usize;
            // The borrow is released: element destructors may re-enter.
            for record in garbage {
                tracing::trace!(
                    address = %record.address,
                    is_array = record.is_array,
                    array_size = record.array_size,
                    "releasing record"
                );
                if let Some(storage) = record.storage {
                    freed = true;
                    elements += storage.release();
                }
            }
            tracing::debug!(
                element = type_name::<T>(),
                removed,
                elements,
                "collect pass reclaimed records"
            );
        }
        freed
    }

    /// Force every refcount to zero and collect once.
    ///
    /// Returns the number of records drained. Handles that are still alive
    /// afterwards find their address gone: dropping them is a no-op and
    /// element access reports [`GcError::Dangling`].
    pub fn shutdown(&self) -> usize {
        let drained = {
            let Ok(mut records) = self.records.try_borrow_mut() else {
                tracing::warn!(
                    element = type_name::<T>(),
                    "shutdown flush skipped: registry borrowed"
                );
                return 0;
            };
            self.tally(|stats| {
                self.settle(&mut records, stats);
                stats.flushes += 1;
                for record in records.map.values_mut() {
                    record.refcount = 0;
                }
                stats.live_refs = 0;
                records.map.len()
            })
        };
        if drained > 0 {
            tracing::debug!(
                element = type_name::<T>(),
                drained,
                "shutdown flush"
            );
        }
        self.collect();
        drained
    }

    /// Insert a record for a fresh allocation with one reference.
    pub(crate) fn track(&self, storage: Allocation<T>) -> Result<RecordInfo, GcError> {
        let (info, zeroed) = {
            let mut records = self.records.try_borrow_mut().map_err(|_| GcError::Borrowed)?;
            self.tally(|stats| {
                let zeroed = self.settle(&mut records, stats);
                let record = AllocationRecord::new(Address::next(), Some(storage));
                let info = record.info();
                records.insert(record, stats);
                (info, zeroed)
            })
        };
        tracing::trace!(
            address = %info.address,
            element = type_name::<T>(),
            array_size = info.array_size,
            "tracking new allocation"
        );
        self.sweep_settled(zeroed);
        Ok(info)
    }

    /// Add a reference to `address`, inserting an orphan record if the
    /// address is unknown. Returns the record's metadata when it could be
    /// applied immediately; otherwise the change is queued.
    pub(crate) fn retain(&self, address: Address) -> Option<RecordInfo> {
        match self.try_retain(address) {
            Ok(info) => Some(info),
            Err(_) => {
                self.defer(Pending::Retain(address));
                None
            }
        }
    }

    /// Like [`retain`](Self::retain), but reports [`GcError::Borrowed`]
    /// instead of queueing the change.
    pub(crate) fn try_retain(&self, address: Address) -> Result<RecordInfo, GcError> {
        let (info, zeroed) = {
            let mut records = self.records.try_borrow_mut().map_err(|_| GcError::Borrowed)?;
            self.tally(|stats| {
                let zeroed = self.settle(&mut records, stats);
                let refcount = records.retain(address, stats);
                tracing::trace!(%address, refcount, "retain");
                let info = records.map.get(&address).map(AllocationRecord::info);
                (info, zeroed)
            })
        };
        self.sweep_settled(zeroed);
        info.ok_or(GcError::Dangling { address })
    }

    /// Drop a reference to `address` and, under the eager policy, collect.
    pub(crate) fn release(&self, address: Address) {
        match self.records.try_borrow_mut() {
            Ok(mut records) => self.tally(|stats| {
                self.settle(&mut records, stats);
                let refcount = records.release(address, stats);
                tracing::trace!(%address, ?refcount, "release");
            }),
            Err(_) => {
                self.defer(Pending::Release(address));
                return;
            }
        }
        if self.config.collects_eagerly() {
            self.collect();
        }
    }

    pub(crate) fn element(
        &self,
        address: Address,
        index: usize,
    ) -> Result<ElementRef<'_, T>, GcError> {
        let records = self.records.try_borrow().map_err(|_| GcError::Borrowed)?;
        let len = records.resolve(address)?.len();
        if index >= len {
            return Err(GcError::OutOfBounds {
                index: index as isize,
                len,
            });
        }
        let value = Ref::filter_map(records, |records| {
            records
                .resolve(address)
                .ok()
                .and_then(|storage| storage.as_slice().get(index))
        })
        .map_err(|_| GcError::Dangling { address })?;
        Ok(ElementRef {
            value,
            _settle: SettleOnDrop(self),
        })
    }

    pub(crate) fn element_mut(
        &self,
        address: Address,
        index: usize,
    ) -> Result<ElementMut<'_, T>, GcError> {
        let mut records = self
            .records
            .try_borrow_mut()
            .map_err(|_| GcError::Borrowed)?;
        let len = records.resolve(address)?.len();
        if index >= len {
            return Err(GcError::OutOfBounds {
                index: index as isize,
                len,
            });
        }
        let value = RefMut::filter_map(records, |records| {
            records
                .resolve_mut(address)
                .ok()
                .and_then(|storage| storage.as_mut_slice().get_mut(index))
        })
        .map_err(|_| GcError::Dangling { address })?;
        Ok(ElementMut {
            value,
            _settle: SettleOnDrop(self),
        })
    }

    pub(crate) fn with_slice<R>(
        &self,
        address: Address,
        f: impl FnOnce(&[T]) -> R,
    ) -> Result<R, GcError> {
        let result = {
            let records = self.records.try_borrow().map_err(|_| GcError::Borrowed)?;
            let storage = records.resolve(address)?;
            f(storage.as_slice())
        };
        self.settle_pending();
        Ok(result)
    }

    pub(crate) fn with_slice_mut<R>(
        &self,
        address: Address,
        f: impl FnOnce(&mut [T]) -> R,
    ) -> Result<R, GcError> {
        let result = {
            let mut records = self
                .records
                .try_borrow_mut()
                .map_err(|_| GcError::Borrowed)?;
            let storage = records.resolve_mut(address)?;
            f(storage.as_mut_slice())
        };
        self.settle_pending();
        Ok(result)
    }

    /// Extent of the live allocation at `address`.
    pub(crate) fn extent(&self, address: Address) -> Result<usize, GcError> {
        let records = self.records.try_borrow().map_err(|_| GcError::Borrowed)?;
        records.resolve(address).map(Allocation::len)
    }

    /// Raw pointer to the first element, or null when unresolvable.
    pub(crate) fn storage_ptr(&self, address: Address) -> *const T {
        self.records
            .try_borrow()
            .ok()
            .and_then(|records| {
                records
                    .resolve(address)
                    .ok()
                    .map(|storage| storage.as_slice().as_ptr())
            })
            .unwrap_or(std::ptr::null())
    }

    /// Run `f` over the counters and store them back. `f` must not re-enter
    /// the registry.
    fn tally<R>(&self, f: impl FnOnce(&mut RegistryStats) -> R) -> R {
        let mut stats = self.stats.get();
        let result = f(&mut stats);
        self.stats.set(stats);
        result
    }

    fn defer(&self, op: Pending) {
        self.tally(|stats| stats.deferred_changes += 1);
        tracing::warn!(
            element = type_name::<T>(),
            ?op,
            "registry borrowed; deferring refcount change"
        );
        self.pending.borrow_mut().push(op);
    }

    /// Apply queued changes. Returns `true` if a release reached zero.
    fn settle(&self, records: &mut Records<T>, stats: &mut RegistryStats) -> bool {
        let ops = std::mem::take(&mut *self.pending.borrow_mut());
        ops.into_iter()
            .fold(false, |zeroed, op| records.apply(op, stats) | zeroed)
    }

    /// Apply queued changes if the records are free, then collect what they
    /// released. Runs whenever an element guard is released.
    fn settle_pending(&self) {
        if self.pending.borrow().is_empty() {
            return;
        }
        let zeroed = {
            let Ok(mut records) = self.records.try_borrow_mut() else {
                return;
            };
            self.tally(|stats| self.settle(&mut records, stats))
        };
        self.sweep_settled(zeroed);
    }

    /// Collect after settling, if a queued release reached zero.
    fn sweep_settled(&self, zeroed: bool) {
        if zeroed && self.config.collects_eagerly() {
            self.collect();
        }
    }

    /// Run `f` over the records, applying queued changes first.
    fn with_settled<R>(&self, f: impl FnOnce(&Records<T>) -> R) -> Result<R, GcError> {
        self.settle_pending();
        let records = self.records.try_borrow().map_err(|_| GcError::Borrowed)?;
        Ok(f(&records))
    }
}

impl<T: fmt::Debug> Registry<T> {
    /// Render the registry as a table of address, refcount, and value.
    pub fn dump(&self) -> String {
        self.display().to_string()
    }

    /// A `Display` adapter over the registry contents.
    pub fn display(&self) -> RegistryDump<'_, T> {
        RegistryDump { registry: self }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("element", &type_name::<T>())
            .field("armed", &self.armed.get())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for Registry<T> {
    fn drop(&mut self) {
        let records = self.records.get_mut();
        let pending = self.pending.get_mut();
        if !records.map.is_empty() || !pending.is_empty() {
            tracing::debug!(
                element = type_name::<T>(),
                records = records.map.len(),
                pending = pending.len(),
                "registry dropped with outstanding records"
            );
        }
    }
}

/// Releasing a guard applies refcount changes queued while it was live.
struct SettleOnDrop<'a, T>(&'a Registry<T>);

impl<T> Drop for SettleOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.settle_pending();
    }
}

/// Shared borrow of one tracked element.
///
/// Refcount changes made while the guard is live are queued and applied
/// when it is dropped.
pub struct ElementRef<'a, T> {
    // Declared before `_settle` so the borrow ends before settling.
    value: Ref<'a, T>,
    _settle: SettleOnDrop<'a, T>,
}

impl<T> Deref for ElementRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ElementRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

/// Exclusive borrow of one tracked element.
///
/// While it is live, per-record queries on the registry report
/// [`GcError::Borrowed`].
pub struct ElementMut<'a, T> {
    value: RefMut<'a, T>,
    _settle: SettleOnDrop<'a, T>,
}

impl<T> Deref for ElementMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for ElementMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ElementMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

/// `Display` adapter produced by [`Registry::display`].
pub struct RegistryDump<'a, T> {
    registry: &'a Registry<T>,
}

impl<T: fmt::Debug> fmt::Display for RegistryDump<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Registry<{}>:", type_name::<T>())?;
        let Ok(records) = self.registry.records.try_borrow() else {
            return writeln!(f, "  <registry borrowed mutably>");
        };
        if records.map.is_empty() {
            return writeln!(f, "  registry is empty");
        }
        writeln!(f, "  {:<10}  {:>8}  value", "address", "refcount")?;
        let limit = self.registry.config.dump_limit;
        for record in records.map.values().take(limit) {
            write!(f, "  {}  {:>8}  ", record.address, record.refcount)?;
            match record.value() {
                Some(value) if record.is_array => {
                    writeln!(f, "{value:?} [len {}]", record.array_size)?
                }
                Some(value) => writeln!(f, "{value:?}")?,
                None => writeln!(f, "---")?,
            }
        }
        if records.map.len() > limit {
            writeln!(f, "  ... {} more", records.map.len() - limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectPolicy;

    fn eager() -> Registry<i32> {
        Registry::new(CollectorConfig::default()).unwrap()
    }

    fn manual() -> Registry<i32> {
        Registry::new(CollectorConfig::manual()).unwrap()
    }

    #[test]
    fn track_inserts_single_reference() {
        let reg = eager();
        let info = reg.track(Allocation::single(19)).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(info.refcount, 1);
        assert!(!info.is_array);
        assert_eq!(reg.lookup(info.address).unwrap(), Some(info));
    }

    #[test]
    fn release_to_zero_collects_eagerly() {
        let reg = eager();
        let info = reg.track(Allocation::single(1)).unwrap();
        reg.release(info.address);
        assert!(reg.is_empty());
        let stats = reg.stats();
        assert_eq!(stats.freed_records, 1);
        assert_eq!(stats.freed_elements, 1);
    }

    #[test]
    fn manual_policy_waits_for_collect() {
        let reg = manual();
        let info = reg.track(Allocation::array(vec![1, 2, 3])).unwrap();
        reg.release(info.address);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(info.address).unwrap().unwrap().refcount, 0);
        assert!(reg.collect());
        assert!(reg.is_empty());
        assert_eq!(reg.stats().freed_elements, 3);
    }

    #[test]
    fn collect_with_nothing_unreferenced_is_a_no_op() {
        let reg = manual();
        let a = reg.track(Allocation::single(1)).unwrap();
        let b = reg.track(Allocation::single(2)).unwrap();
        let before = reg.records().unwrap();
        assert!(!reg.collect());
        let after = reg.records().unwrap();
        assert_eq!(after, before);
        assert_eq!(after[0].address, a.address);
        assert_eq!(after[1].address, b.address);
    }

    #[test]
    fn second_collect_frees_nothing() {
        let reg = manual();
        let info = reg.track(Allocation::single(5)).unwrap();
        reg.release(info.address);
        assert!(reg.collect());
        assert!(!reg.collect());
        assert_eq!(reg.stats().freed_records, 1);
        assert_eq!(reg.stats().collections, 2);
    }

    #[test]
    fn collect_keeps_survivor_order() {
        let reg = manual();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        let b = reg.track(Allocation::single(2)).unwrap().address;
        let c = reg.track(Allocation::single(3)).unwrap().address;
        reg.release(b);
        reg.collect();
        let order: Vec<_> = reg.records().unwrap().iter().map(|r| r.address).collect();
        assert_eq!(order, vec![a, c]);
    }

    #[test]
    fn retain_unknown_address_inserts_orphan() {
        let reg = eager();
        let ghost = Address::from_raw(u64::MAX);
        let info = reg.retain(ghost).unwrap();
        assert_eq!(info.refcount, 1);
        assert!(!info.is_array);
        // Orphans hold no storage, so removing one frees nothing.
        reg.release(ghost);
        assert!(reg.is_empty());
        assert_eq!(reg.stats().freed_elements, 0);
    }

    #[test]
    fn orphan_collection_reports_nothing_freed() {
        let reg = manual();
        let ghost = Address::from_raw(u64::MAX - 1);
        reg.retain(ghost);
        reg.release(ghost);
        assert!(!reg.collect());
        assert!(reg.is_empty());
    }

    #[test]
    fn release_of_unknown_address_is_ignored() {
        let reg = eager();
        let info = reg.track(Allocation::single(1)).unwrap();
        reg.release(Address::from_raw(u64::MAX - 2));
        assert_eq!(reg.lookup(info.address).unwrap().unwrap().refcount, 1);
    }

    #[test]
    fn shutdown_drains_everything() {
        let reg = eager();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        reg.retain(a);
        reg.track(Allocation::array([1, 2])).unwrap();
        assert_eq!(reg.shutdown(), 2);
        assert!(reg.is_empty());
        assert_eq!(reg.stats().flushes, 1);
        // Late releases after the flush are harmless.
        reg.release(a);
        assert!(reg.is_empty());
    }

    #[test]
    fn release_under_guard_is_applied_when_guard_drops() {
        let reg = eager();
        let a = reg.track(Allocation::single(10)).unwrap().address;
        let b = reg.track(Allocation::single(20)).unwrap().address;
        {
            let guard = reg.element(a, 0).unwrap();
            assert_eq!(*guard, 10);
            reg.release(b);
            // Could not apply while the guard was live.
            assert_eq!(reg.stats().deferred_changes, 1);
            assert_eq!(reg.lookup(b).unwrap().unwrap().refcount, 1);
        }
        // Settled and collected as the guard went away.
        assert!(!reg.contains(b).unwrap());
        assert!(reg.contains(a).unwrap());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.stats().freed_records, 1);
        assert!(!reg.collect());
    }

    #[test]
    fn release_inside_slice_closure_is_collected_on_return() {
        let reg = eager();
        let a = reg.track(Allocation::array([1, 2])).unwrap().address;
        let b = reg.track(Allocation::single(3)).unwrap().address;
        let sum = reg
            .with_slice(a, |s| {
                reg.release(b);
                s.iter().sum::<i32>()
            })
            .unwrap();
        assert_eq!(sum, 3);
        assert_eq!(reg.len(), 1);
        assert!(!reg.contains(b).unwrap());
        assert_eq!(reg.stats().live_refs, 1);
    }

    #[test]
    fn manual_policy_settles_without_collecting() {
        let reg = manual();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        let b = reg.track(Allocation::single(2)).unwrap().address;
        reg.with_slice_mut(a, |_| reg.release(b)).unwrap();
        assert_eq!(reg.lookup(b).unwrap().unwrap().refcount, 0);
        assert_eq!(reg.len(), 2);
        assert!(reg.collect());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn queries_under_mutable_guard_report_borrowed() {
        let reg = eager();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        reg.retain(a);
        {
            let mut guard = reg.element_mut(a, 0).unwrap();
            *guard = 2;
            // Counters stay readable; per-record views do not.
            assert_eq!(reg.len(), 1);
            assert!(!reg.is_empty());
            assert_eq!(reg.stats().records, 1);
            assert_eq!(reg.stats().live_refs, 2);
            assert_eq!(reg.lookup(a).unwrap_err(), GcError::Borrowed);
            assert_eq!(reg.contains(a).unwrap_err(), GcError::Borrowed);
            assert_eq!(reg.records().unwrap_err(), GcError::Borrowed);
            assert!(reg.dump().contains("borrowed mutably"));
        }
        assert_eq!(reg.lookup(a).unwrap().unwrap().refcount, 2);
        assert_eq!(*reg.element(a, 0).unwrap(), 2);
    }

    #[test]
    fn try_retain_under_guard_reports_borrowed() {
        let reg = eager();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        let _guard = reg.element(a, 0).unwrap();
        assert_eq!(reg.try_retain(a).unwrap_err(), GcError::Borrowed);
        assert_eq!(reg.stats().deferred_changes, 0);
        assert_eq!(reg.stats().live_refs, 1);
    }

    #[test]
    fn retain_under_guard_is_counted_as_deferred() {
        let reg = eager();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        {
            let _guard = reg.element(a, 0).unwrap();
            assert!(reg.retain(a).is_none());
            assert_eq!(reg.stats().deferred_changes, 1);
        }
        assert_eq!(reg.lookup(a).unwrap().unwrap().refcount, 2);
        assert_eq!(reg.stats().live_refs, 2);
    }

    #[test]
    fn element_access_is_bounds_checked() {
        let reg = eager();
        let a = reg.track(Allocation::array([4, 5])).unwrap().address;
        assert_eq!(*reg.element(a, 1).unwrap(), 5);
        assert_eq!(
            reg.element(a, 2).unwrap_err(),
            GcError::OutOfBounds { index: 2, len: 2 }
        );
        *reg.element_mut(a, 0).unwrap() = 40;
        assert_eq!(reg.with_slice(a, |s| s.to_vec()).unwrap(), vec![40, 5]);
    }

    #[test]
    fn element_access_reports_null_and_dangling() {
        let reg = eager();
        assert_eq!(reg.element(Address::NULL, 0).unwrap_err(), GcError::NullPointer);
        let ghost = Address::from_raw(u64::MAX - 3);
        assert_eq!(
            reg.element(ghost, 0).unwrap_err(),
            GcError::Dangling { address: ghost }
        );
        assert!(reg.storage_ptr(ghost).is_null());
    }

    #[test]
    fn conflicting_mutable_access_reports_borrowed() {
        let reg = eager();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        let _guard = reg.element(a, 0).unwrap();
        assert_eq!(reg.element_mut(a, 0).unwrap_err(), GcError::Borrowed);
        assert_eq!(
            reg.track(Allocation::single(2)).unwrap_err(),
            GcError::Borrowed
        );
    }

    #[test]
    fn dump_lists_records() {
        let reg = eager();
        let a = reg.track(Allocation::single(21)).unwrap().address;
        reg.track(Allocation::array([7, 8, 9])).unwrap();
        let dump = reg.dump();
        assert!(dump.starts_with("Registry<i32>:"));
        assert!(dump.contains(&a.to_string()));
        assert!(dump.contains("21"));
        assert!(dump.contains("7 [len 3]"));
    }

    #[test]
    fn dump_of_empty_registry() {
        let reg = eager();
        assert!(reg.dump().contains("registry is empty"));
    }

    #[test]
    fn dump_respects_limit() {
        let config = CollectorConfig {
            dump_limit: 2,
            policy: CollectPolicy::Eager,
            ..CollectorConfig::default()
        };
        let reg: Registry<i32> = Registry::new(config).unwrap();
        for i in 0..5 {
            reg.track(Allocation::single(i)).unwrap();
        }
        assert!(reg.dump().contains("... 3 more"));
    }

    #[test]
    fn invalid_config_rejected() {
        let config = CollectorConfig {
            dump_limit: 0,
            ..CollectorConfig::default()
        };
        assert!(Registry::<i32>::new(config).is_err());
    }

    #[test]
    fn arm_fires_once() {
        let reg = eager();
        assert!(!reg.is_armed());
        assert!(reg.arm());
        assert!(!reg.arm());
        assert!(reg.is_armed());
    }

    #[test]
    fn peak_records_tracks_high_water_mark() {
        let reg = eager();
        let a = reg.track(Allocation::single(1)).unwrap().address;
        let b = reg.track(Allocation::single(2)).unwrap().address;
        reg.release(a);
        reg.release(b);
        let stats = reg.stats();
        assert_eq!(stats.peak_records, 2);
        assert_eq!(stats.records, 0);
        assert_eq!(stats.outstanding(), 0);
    }
}
