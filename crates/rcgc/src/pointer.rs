//! Reference-counted tracked pointers.
//!
//! A [`TrackedPointer`] is a handle onto one record in a [`Registry`]. It
//! never owns memory itself: ownership is shared by every handle whose
//! address matches the record, and release is governed entirely by the
//! record's refcount.
//!
//! ```text
//! new / assign  ──► track(allocation)      refcount = 1
//! clone         ──► retain(address)        refcount += 1
//! assign_from   ──► retain(new), release(old)
//! drop          ──► release(address)       refcount -= 1, collect
//! ```
//!
//! The const parameter `N` declares the array length at the type level.
//! `N == 0` (the default) accepts any extent; `N > 0` rejects allocations
//! of any other length with [`GcError::ExtentMismatch`].

use std::fmt;
use std::rc::Rc;

use crate::address::Address;
use crate::cursor::BoundedCursor;
use crate::error::GcError;
use crate::record::{Allocation, RecordInfo};
use crate::registry::{ElementMut, ElementRef, SharedRegistry};

/// A reference-counted handle onto a registry-tracked allocation.
#[must_use]
pub struct TrackedPointer<T, const N: usize = 0> {
    registry: SharedRegistry<T>,
    address: Address,
    /// Mirrors the record at bind time.
    is_array: bool,
    array_size: usize,
    extent: usize,
}

impl<T, const N: usize> TrackedPointer<T, N> {
    /// Track a fresh allocation and bind a handle to it with refcount 1.
    ///
    /// The first handle bound to a registry arms it for its heap's
    /// shutdown flush.
    pub fn new(
        registry: &SharedRegistry<T>,
        allocation: impl Into<Allocation<T>>,
    ) -> Result<Self, GcError> {
        let allocation = allocation.into();
        check_extent::<N>(allocation.len())?;
        let info = registry.track(allocation)?;
        arm(registry);
        Ok(Self::bound(Rc::clone(registry), info))
    }

    /// A handle referencing nothing.
    ///
    /// All null handles of a registry share its single null record.
    pub fn null(registry: &SharedRegistry<T>) -> Self {
        arm(registry);
        registry.retain(Address::NULL);
        Self {
            registry: Rc::clone(registry),
            address: Address::NULL,
            is_array: false,
            array_size: 0,
            extent: 0,
        }
    }

    fn bound(registry: SharedRegistry<T>, info: RecordInfo) -> Self {
        Self {
            registry,
            address: info.address,
            is_array: info.is_array,
            array_size: info.array_size,
            extent: info.extent,
        }
    }

    /// The referenced address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether this handle references nothing.
    pub fn is_null(&self) -> bool {
        self.address.is_null()
    }

    /// Whether the referenced allocation is an array.
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Array length, or 0 for a single object.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Number of elements reachable through this handle.
    pub fn len(&self) -> usize {
        self.extent
    }

    /// Whether no element is reachable (null, or an empty array).
    pub fn is_empty(&self) -> bool {
        self.extent == 0
    }

    /// The registry this handle is tracked in.
    pub fn registry(&self) -> &SharedRegistry<T> {
        &self.registry
    }

    /// Current refcount of the referenced record; 0 once it has been drained.
    ///
    /// Reports [`GcError::Borrowed`] while a mutable element guard on the
    /// same registry is live.
    pub fn refcount(&self) -> Result<usize, GcError> {
        self.registry
            .lookup(self.address)
            .map(|info| info.map_or(0, |info| info.refcount))
    }

    /// Whether the referenced allocation is still tracked.
    pub fn is_live(&self) -> Result<bool, GcError> {
        if self.is_null() {
            return Ok(false);
        }
        match self.registry.extent(self.address) {
            Ok(_) => Ok(true),
            Err(GcError::Dangling { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Raw pointer to the first element, or null when nothing is tracked.
    ///
    /// Valid only while the record is alive and no mutable guard is held.
    pub fn as_ptr(&self) -> *const T {
        self.registry.storage_ptr(self.address)
    }

    /// Borrow the first (or only) element.
    pub fn get(&self) -> Result<ElementRef<'_, T>, GcError> {
        self.at(0)
    }

    /// Mutably borrow the first (or only) element.
    pub fn get_mut(&self) -> Result<ElementMut<'_, T>, GcError> {
        self.at_mut(0)
    }

    /// Borrow element `index`.
    pub fn at(&self, index: usize) -> Result<ElementRef<'_, T>, GcError> {
        self.check_index(index)?;
        self.registry.element(self.address, index)
    }

    /// Mutably borrow element `index`.
    pub fn at_mut(&self, index: usize) -> Result<ElementMut<'_, T>, GcError> {
        self.check_index(index)?;
        self.registry.element_mut(self.address, index)
    }

    /// Overwrite element `index`, returning the previous value.
    pub fn set(&self, index: usize, value: T) -> Result<T, GcError> {
        let mut slot = self.at_mut(index)?;
        Ok(std::mem::replace(&mut *slot, value))
    }

    /// Run `f` over the whole allocation.
    pub fn with_slice<R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R, GcError> {
        self.registry.with_slice(self.address, f)
    }

    /// Run `f` over the whole allocation, mutably.
    pub fn with_slice_mut<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> Result<R, GcError> {
        self.registry.with_slice_mut(self.address, f)
    }

    /// Cursor at the first element.
    pub fn begin(&self) -> BoundedCursor<T> {
        BoundedCursor::new(Rc::clone(&self.registry), self.address, 0, self.extent)
    }

    /// Cursor one past the last element.
    pub fn end(&self) -> BoundedCursor<T> {
        BoundedCursor::new(
            Rc::clone(&self.registry),
            self.address,
            self.extent,
            self.extent,
        )
    }

    /// Rebind to a fresh allocation, releasing the old referent.
    ///
    /// If this handle was the sole referent of its old address, the old
    /// allocation is freed before this returns (under the eager policy).
    /// The extent is validated first; on error the handle is unchanged.
    pub fn assign(&mut self, allocation: impl Into<Allocation<T>>) -> Result<Address, GcError> {
        let allocation = allocation.into();
        check_extent::<N>(allocation.len())?;
        let info = self.registry.track(allocation)?;
        self.rebind_to(Rc::clone(&self.registry), info.address, Some(info));
        Ok(info.address)
    }

    /// Rebind to a fresh single object.
    pub fn assign_value(&mut self, value: T) -> Result<Address, GcError> {
        self.assign(Allocation::single(value))
    }

    /// Rebind to an address in this handle's registry.
    ///
    /// Shares the existing record when there is one. An unknown address
    /// gets an orphan record with one reference, so element access through
    /// it reports [`GcError::Dangling`]. While an element guard on the
    /// registry is live the record cannot be checked, and this reports
    /// [`GcError::Borrowed`] with the handle unchanged.
    pub fn rebind(&mut self, address: Address) -> Result<&mut Self, GcError> {
        if address == self.address {
            return Ok(self);
        }
        if let Some(existing) = self.registry.lookup(address)? {
            if !address.is_null() {
                check_extent::<N>(existing.extent)?;
            }
        }
        let info = self.registry.try_retain(address)?;
        self.rebind_to(Rc::clone(&self.registry), address, Some(info));
        Ok(self)
    }

    /// Share `rhs`'s allocation, releasing this handle's old referent.
    ///
    /// Assigning a handle to itself (or to another handle of the same
    /// allocation) leaves every refcount unchanged. Returns `self` so
    /// assignments chain.
    pub fn assign_from(&mut self, rhs: &Self) -> &mut Self {
        if self.address == rhs.address && Rc::ptr_eq(&self.registry, &rhs.registry) {
            return self;
        }
        let info = rhs.registry.retain(rhs.address);
        let info = info.unwrap_or(RecordInfo {
            address: rhs.address,
            refcount: 0,
            is_array: rhs.is_array,
            array_size: rhs.array_size,
            extent: rhs.extent,
        });
        self.rebind_to(Rc::clone(&rhs.registry), rhs.address, Some(info));
        self
    }

    /// Point at `address` in `registry` (already retained by the caller)
    /// and release the previous referent.
    fn rebind_to(
        &mut self,
        registry: SharedRegistry<T>,
        address: Address,
        info: Option<RecordInfo>,
    ) {
        let old_registry = std::mem::replace(&mut self.registry, registry);
        let old_address = std::mem::replace(&mut self.address, address);
        match info {
            Some(info) => {
                self.is_array = info.is_array;
                self.array_size = info.array_size;
                self.extent = info.extent;
            }
            // Retain was deferred; the record could not be read.
            None => {
                self.is_array = false;
                self.array_size = 0;
                self.extent = 0;
            }
        }
        old_registry.release(old_address);
    }

    fn check_index(&self, index: usize) -> Result<(), GcError> {
        if self.is_null() {
            return Err(GcError::NullPointer);
        }
        if self.extent == 0 {
            // Distinguish an empty array from an orphan.
            self.registry.extent(self.address)?;
        }
        if index >= self.extent {
            return Err(GcError::OutOfBounds {
                index: index as isize,
                len: self.extent,
            });
        }
        Ok(())
    }
}

impl<T: Clone, const N: usize> TrackedPointer<T, N> {
    /// Copy every element out of the allocation.
    pub fn to_vec(&self) -> Result<Vec<T>, GcError> {
        self.with_slice(<[T]>::to_vec)
    }
}

fn check_extent<const N: usize>(actual: usize) -> Result<(), GcError> {
    if N > 0 && actual != N {
        return Err(GcError::ExtentMismatch {
            declared: N,
            actual,
        });
    }
    Ok(())
}

fn arm<T>(registry: &SharedRegistry<T>) {
    if registry.arm() {
        tracing::debug!(
            element = std::any::type_name::<T>(),
            "first tracked pointer bound; registry enlisted for shutdown flush"
        );
    }
}

impl<T, const N: usize> Clone for TrackedPointer<T, N> {
    /// Share the allocation, bumping its refcount by one.
    ///
    /// A clone starts with no referent of its own, so there is nothing to
    /// release before adopting the source's address.
    fn clone(&self) -> Self {
        match self.registry.retain(self.address) {
            // An orphan inserted for a drained address reports no extent.
            Some(info) => Self::bound(Rc::clone(&self.registry), info),
            None => Self {
                registry: Rc::clone(&self.registry),
                address: self.address,
                is_array: self.is_array,
                array_size: self.array_size,
                extent: self.extent,
            },
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign_from(source);
    }
}

impl<T, const N: usize> Drop for TrackedPointer<T, N> {
    fn drop(&mut self) {
        self.registry.release(self.address);
    }
}

impl<T, const N: usize> PartialEq for TrackedPointer<T, N> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && Rc::ptr_eq(&self.registry, &other.registry)
    }
}

impl<T, const N: usize> Eq for TrackedPointer<T, N> {}

impl<T, const N: usize> From<&TrackedPointer<T, N>> for Address {
    fn from(pointer: &TrackedPointer<T, N>) -> Self {
        pointer.address
    }
}

impl<T, const N: usize> fmt::Debug for TrackedPointer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedPointer")
            .field("address", &self.address)
            .field("is_array", &self.is_array)
            .field("array_size", &self.array_size)
            .field("refcount", &self.refcount().ok())
            .finish()
    }
}

impl<T, const N: usize> fmt::Pointer for TrackedPointer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.address, f)
    }
}
