//! Allocation storage and the per-allocation bookkeeping record.
//!
//! An [`Allocation`] is the owned backing memory for one tracked object or
//! array. An [`AllocationRecord`] pairs it with the live reference count and
//! the array metadata the registry needs to decide when and how to free it.

use std::fmt;

use crate::address::Address;

/// Owned backing storage for one tracked allocation.
///
/// The element count is always explicit: a single object has extent 1 and
/// an array carries its own length. Nothing is inferred from byte sizes.
pub enum Allocation<T> {
    /// One boxed object.
    Single(Box<T>),
    /// A contiguous boxed sequence.
    Array(Box<[T]>),
}

impl<T> Allocation<T> {
    /// Allocate a single object.
    pub fn single(value: T) -> Self {
        Self::Single(Box::new(value))
    }

    /// Allocate an array from anything convertible to a boxed slice
    /// (`Vec<T>`, `[T; K]`, `Box<[T]>`).
    pub fn array(values: impl Into<Box<[T]>>) -> Self {
        Self::Array(values.into())
    }

    /// Number of elements in the allocation.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Array(values) => values.len(),
        }
    }

    /// Whether the allocation holds no elements (only possible for arrays).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the allocation is recorded as an array.
    ///
    /// Matches the record invariant `array_size > 0 ⇔ is_array`, so an empty
    /// array is not an array for bookkeeping purposes.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(values) if !values.is_empty())
    }

    /// The length recorded as `array_size`: 0 for single objects.
    pub fn array_size(&self) -> usize {
        match self {
            Self::Single(_) => 0,
            Self::Array(values) => values.len(),
        }
    }

    /// View the allocation as a slice of its elements.
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::Single(value) => std::slice::from_ref(&**value),
            Self::Array(values) => values,
        }
    }

    /// Mutable view of the allocation's elements.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            Self::Single(value) => std::slice::from_mut(&mut **value),
            Self::Array(values) => values,
        }
    }

    /// Free the storage, returning how many elements were dropped.
    ///
    /// Arrays are released as a boxed slice, single objects as a box.
    pub(crate) fn release(self) -> usize {
        match self {
            Self::Single(value) => {
                drop(value);
                1
            }
            Self::Array(values) => {
                let len = values.len();
                drop(values);
                len
            }
        }
    }
}

impl<T> From<Box<T>> for Allocation<T> {
    fn from(value: Box<T>) -> Self {
        Self::Single(value)
    }
}

impl<T> From<Vec<T>> for Allocation<T> {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_boxed_slice())
    }
}

impl<T, const K: usize> From<[T; K]> for Allocation<T> {
    fn from(values: [T; K]) -> Self {
        Self::Array(Box::new(values))
    }
}

impl<T: fmt::Debug> fmt::Debug for Allocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(value) => f.debug_tuple("Single").field(value).finish(),
            Self::Array(values) => f.debug_tuple("Array").field(values).finish(),
        }
    }
}

/// Bookkeeping for one tracked allocation.
///
/// `storage` is `None` for the shared null record and for orphan records
/// inserted when a handle references an address the registry no longer
/// knows. Such records are removed by collection without freeing anything.
pub struct AllocationRecord<T> {
    pub(crate) address: Address,
    pub(crate) refcount: usize,
    pub(crate) is_array: bool,
    pub(crate) array_size: usize,
    pub(crate) storage: Option<Allocation<T>>,
}

impl<T> AllocationRecord<T> {
    /// A record with one reference, mirroring the storage's array metadata.
    pub(crate) fn new(address: Address, storage: Option<Allocation<T>>) -> Self {
        let (is_array, array_size) = storage
            .as_ref()
            .map_or((false, 0), |s| (s.is_array(), s.array_size()));
        Self {
            address,
            refcount: 1,
            is_array,
            array_size,
            storage,
        }
    }

    /// The tracked address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Number of live handles referencing this address.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Whether the allocation is an array.
    pub fn is_array(&self) -> bool {
        self.is_array
    }

    /// Array length, or 0 for single objects.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Whether the record owns backing storage.
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Number of addressable elements: 0 without storage.
    pub fn extent(&self) -> usize {
        self.storage.as_ref().map_or(0, Allocation::len)
    }

    /// The first element, if any. Used by the registry dump.
    pub fn value(&self) -> Option<&T> {
        self.storage.as_ref().and_then(|s| s.as_slice().first())
    }

    /// Whether collection may reclaim this record.
    pub fn is_unreferenced(&self) -> bool {
        self.refcount == 0
    }

    /// Copyable snapshot of the record's metadata.
    pub fn info(&self) -> RecordInfo {
        RecordInfo {
            address: self.address,
            refcount: self.refcount,
            is_array: self.is_array,
            array_size: self.array_size,
            extent: self.extent(),
        }
    }
}

impl<T> PartialEq for AllocationRecord<T> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl<T> fmt::Debug for AllocationRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationRecord")
            .field("address", &self.address)
            .field("refcount", &self.refcount)
            .field("is_array", &self.is_array)
            .field("array_size", &self.array_size)
            .field("has_storage", &self.storage.is_some())
            .finish()
    }
}

/// Metadata snapshot of an [`AllocationRecord`], detached from the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordInfo {
    /// The tracked address.
    pub address: Address,
    /// Live handle count.
    pub refcount: usize,
    /// Whether the allocation is an array.
    pub is_array: bool,
    /// Array length, or 0 for single objects.
    pub array_size: usize,
    /// Addressable elements: 1 for an object, the length for an array,
    /// 0 when the record holds no storage.
    pub extent: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_allocation_is_not_array() {
        let alloc = Allocation::single(19);
        assert_eq!(alloc.len(), 1);
        assert!(!alloc.is_array());
        assert_eq!(alloc.array_size(), 0);
        assert_eq!(alloc.as_slice(), &[19]);
    }

    #[test]
    fn vec_allocation_records_length() {
        let alloc: Allocation<i32> = vec![1, 2, 3].into();
        assert!(alloc.is_array());
        assert_eq!(alloc.array_size(), 3);
        assert_eq!(alloc.release(), 3);
    }

    #[test]
    fn empty_array_is_not_recorded_as_array() {
        let alloc: Allocation<u8> = Vec::new().into();
        assert!(alloc.is_empty());
        assert!(!alloc.is_array());
        assert_eq!(alloc.array_size(), 0);
    }

    #[test]
    fn array_of_one_is_still_an_array() {
        let alloc: Allocation<u8> = [7].into();
        assert!(alloc.is_array());
        assert_eq!(alloc.array_size(), 1);
    }

    #[test]
    fn record_mirrors_storage_metadata() {
        let rec = AllocationRecord::new(Address::from_raw(9), Some(Allocation::array([1, 2])));
        assert_eq!(rec.refcount(), 1);
        assert!(rec.is_array());
        assert_eq!(rec.array_size(), 2);
        assert_eq!(rec.extent(), 2);
        assert_eq!(rec.value(), Some(&1));
    }

    #[test]
    fn records_compare_by_address_only() {
        let a = AllocationRecord::new(Address::from_raw(3), Some(Allocation::single(1)));
        let mut b = AllocationRecord::new(Address::from_raw(3), Some(Allocation::single(2)));
        b.refcount = 7;
        let c = AllocationRecord::new(Address::from_raw(4), Some(Allocation::single(1)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn orphan_record_has_no_extent() {
        let rec: AllocationRecord<i32> = AllocationRecord::new(Address::from_raw(5), None);
        assert!(!rec.has_storage());
        assert_eq!(rec.extent(), 0);
        assert_eq!(rec.value(), None);
    }
}
