//! Bounded cursors over one allocation.
//!
//! A [`BoundedCursor`] is an index into a tracked allocation's extent. It
//! may sit anywhere in `[begin, end]` but only dereferences inside
//! `[begin, end)`; every move or access that would leave those bounds fails
//! with [`GcError::OutOfBounds`] instead of touching neighbouring memory.
//! Cursors never change refcounts.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::address::Address;
use crate::error::GcError;
use crate::registry::{ElementMut, ElementRef, SharedRegistry};

/// A position inside one tracked allocation.
pub struct BoundedCursor<T> {
    registry: SharedRegistry<T>,
    address: Address,
    position: usize,
    len: usize,
}

impl<T> BoundedCursor<T> {
    pub(crate) fn new(
        registry: SharedRegistry<T>,
        address: Address,
        position: usize,
        len: usize,
    ) -> Self {
        Self {
            registry,
            address,
            position,
            len,
        }
    }

    /// Index of the current element.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Extent of the underlying allocation.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocation has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The allocation this cursor walks.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether the cursor is one past the last element.
    pub fn is_end(&self) -> bool {
        self.position == self.len
    }

    /// Elements between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.len - self.position
    }

    /// Borrow the current element.
    pub fn get(&self) -> Result<ElementRef<'_, T>, GcError> {
        self.at(0)
    }

    /// Mutably borrow the current element.
    pub fn get_mut(&self) -> Result<ElementMut<'_, T>, GcError> {
        self.at_mut(0)
    }

    /// Borrow the element `offset` places from the cursor.
    pub fn at(&self, offset: isize) -> Result<ElementRef<'_, T>, GcError> {
        let index = self.element_index(offset)?;
        self.registry.element(self.address, index)
    }

    /// Mutably borrow the element `offset` places from the cursor.
    pub fn at_mut(&self, offset: isize) -> Result<ElementMut<'_, T>, GcError> {
        let index = self.element_index(offset)?;
        self.registry.element_mut(self.address, index)
    }

    /// A new cursor `delta` places away. May land on the end position.
    pub fn offset(&self, delta: isize) -> Result<Self, GcError> {
        let position = self.target(delta)?;
        Ok(Self {
            position,
            ..self.clone()
        })
    }

    /// Move forward `n` elements.
    pub fn advance(&mut self, n: usize) -> Result<&mut Self, GcError> {
        self.position = self.target(to_offset(n)?)?;
        Ok(self)
    }

    /// Move backward `n` elements.
    pub fn retreat(&mut self, n: usize) -> Result<&mut Self, GcError> {
        self.position = self.target(-to_offset(n)?)?;
        Ok(self)
    }

    /// Move forward one element.
    pub fn step_forward(&mut self) -> Result<&mut Self, GcError> {
        self.advance(1)
    }

    /// Move backward one element.
    pub fn step_back(&mut self) -> Result<&mut Self, GcError> {
        self.retreat(1)
    }

    /// Signed number of elements from `self` to `other`, if both walk the
    /// same allocation.
    pub fn distance_to(&self, other: &Self) -> Option<isize> {
        if !self.same_allocation(other) {
            return None;
        }
        Some(other.position as isize - self.position as isize)
    }

    fn same_allocation(&self, other: &Self) -> bool {
        self.address == other.address && Rc::ptr_eq(&self.registry, &other.registry)
    }

    /// Position reached by moving `delta`, restricted to `[0, len]`.
    fn target(&self, delta: isize) -> Result<usize, GcError> {
        let index = self.shifted(delta)?;
        if index > self.len {
            return Err(self.out_of_bounds(index as isize));
        }
        Ok(index)
    }

    /// Element index `offset` away, restricted to `[0, len)`.
    fn element_index(&self, offset: isize) -> Result<usize, GcError> {
        let index = self.shifted(offset)?;
        if index >= self.len {
            return Err(self.out_of_bounds(index as isize));
        }
        Ok(index)
    }

    /// `position + delta`, rejecting results below zero or past `isize`.
    fn shifted(&self, delta: isize) -> Result<usize, GcError> {
        let saturated = if delta < 0 { isize::MIN } else { isize::MAX };
        let index = isize::try_from(self.position)
            .ok()
            .and_then(|position| position.checked_add(delta))
            .ok_or_else(|| self.out_of_bounds(saturated))?;
        usize::try_from(index).map_err(|_| self.out_of_bounds(index))
    }

    fn out_of_bounds(&self, index: isize) -> GcError {
        GcError::OutOfBounds {
            index,
            len: self.len,
        }
    }
}

fn to_offset(n: usize) -> Result<isize, GcError> {
    isize::try_from(n).map_err(|_| GcError::OutOfBounds {
        index: isize::MAX,
        len: 0,
    })
}

impl<T> Clone for BoundedCursor<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Rc::clone(&self.registry),
            address: self.address,
            position: self.position,
            len: self.len,
        }
    }
}

impl<T> PartialEq for BoundedCursor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.same_allocation(other) && self.position == other.position
    }
}

impl<T> Eq for BoundedCursor<T> {}

impl<T> PartialOrd for BoundedCursor<T> {
    /// Cursors into different allocations are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.same_allocation(other)
            .then(|| self.position.cmp(&other.position))
    }
}

impl<T> fmt::Debug for BoundedCursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCursor")
            .field("address", &self.address)
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}

/// Iterator over copies of the elements from a cursor to the end.
///
/// Stops early if the allocation is no longer resolvable.
pub struct Values<T> {
    cursor: BoundedCursor<T>,
}

impl<T: Clone> Iterator for Values<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let value = self.cursor.get().ok().map(|value| T::clone(&value))?;
        self.cursor.position += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.cursor.remaining()))
    }
}

impl<T: Clone> IntoIterator for BoundedCursor<T> {
    type Item = T;
    type IntoIter = Values<T>;

    fn into_iter(self) -> Values<T> {
        Values { cursor: self }
    }
}
