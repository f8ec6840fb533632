//! [`FixedSizeBucket`] is a flat, fixed-capacity concurrent sparse array.

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed};
use std::sync::Arc;

use sdd::{AtomicShared, Guard};

use crate::bucket::core::{self, Slot, SlotReservoir};
use crate::bucket::{BucketReservoir, UpdateOutcome};

/// A flat, fixed-capacity concurrent sparse array.
///
/// A [`FixedSizeBucket`] offers the same per-slot operations as [`Bucket`](crate::Bucket) over
/// a single flat array chosen at construction time: no tree levels, no lazy node creation,
/// every operation a constant number of atomic instructions. It suits hot, bounded index
/// spaces where the capacity is known up front.
///
/// Out-of-range indices are a programmer error and panic; this differs from
/// [`Bucket`](crate::Bucket) only in how small the valid range is.
///
/// # Examples
///
/// ```
/// use scb::FixedSizeBucket;
///
/// let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(8);
///
/// assert!(bucket.insert(7, 49).is_ok());
/// assert_eq!(bucket.get(7), Some(49));
/// assert_eq!(bucket.len(), 1);
/// ```
pub struct FixedSizeBucket<T: 'static> {
    slots: Box<[AtomicShared<Slot<T>>]>,
    capacity: usize,
    len: AtomicUsize,
    reservoir: Arc<SlotReservoir<T>>,
}

impl<T: 'static> FixedSizeBucket<T> {
    /// Creates an empty [`FixedSizeBucket`] addressing at least `capacity` indices.
    ///
    /// The backing array length is the next power of two greater than or equal to
    /// `capacity`, with a minimum of `8`; [`capacity`](Self::capacity) reports the rounded
    /// length, and every index below it is addressable.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::FixedSizeBucket;
    ///
    /// let bucket: FixedSizeBucket<u8> = FixedSizeBucket::new(100);
    /// assert_eq!(bucket.capacity(), 128);
    /// assert!(bucket.insert(127, 7).is_ok());
    /// ```
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_reservoir(capacity, &BucketReservoir::new())
    }

    /// Creates an empty [`FixedSizeBucket`] borrowing its backing array from the given
    /// reservoir.
    #[inline]
    #[must_use]
    pub fn with_reservoir(capacity: usize, reservoir: &BucketReservoir<T>) -> Self {
        let slots = reservoir.inner().slots.get_array(capacity);
        Self {
            capacity: slots.len(),
            slots,
            len: AtomicUsize::new(0),
            reservoir: reservoir.inner().clone(),
        }
    }

    /// Returns the number of addressable indices.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of values in the [`FixedSizeBucket`].
    ///
    /// Exact in any quiescent state; may transiently disagree with an enumeration while
    /// writers are in flight.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    /// Returns `true` if the [`FixedSizeBucket`] holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `item` at `index` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns the item back if the slot is occupied or a concurrent writer wins the race.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::FixedSizeBucket;
    ///
    /// let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(8);
    ///
    /// assert!(bucket.insert(7, 1).is_ok());
    /// assert_eq!(bucket.insert(7, 2), Err(2));
    /// ```
    #[inline]
    pub fn insert(&self, index: usize, item: T) -> Result<(), T> {
        let guard = Guard::new();
        match core::try_insert(self.slot(index), item, &guard) {
            Ok(()) => {
                self.len.fetch_add(1, Relaxed);
                Ok(())
            }
            Err(item) => Err(item),
        }
    }

    /// Unconditionally stores `item` at `index`, returning the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn exchange(&self, index: usize, item: T) -> Option<T>
    where
        T: Clone,
    {
        let guard = Guard::new();
        let previous = core::exchange_slot(self.slot(index), item, &guard);
        if previous.is_none() {
            self.len.fetch_add(1, Relaxed);
        }
        previous
    }

    /// Unconditionally stores `item` at `index`, reporting whether the slot was empty.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::FixedSizeBucket;
    ///
    /// let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(4);
    ///
    /// assert!(bucket.set(0, 1));
    /// assert!(!bucket.set(0, 2));
    /// assert_eq!(bucket.len(), 1);
    /// ```
    #[inline]
    pub fn set(&self, index: usize, item: T) -> bool {
        let guard = Guard::new();
        let was_empty = core::overwrite_slot(self.slot(index), item, &guard);
        if was_empty {
            self.len.fetch_add(1, Relaxed);
        }
        was_empty
    }

    /// Removes the value at `index`, reporting whether a value was removed.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn remove(&self, index: usize) -> bool {
        let guard = Guard::new();
        let removed = core::clear_slot(self.slot(index), &guard);
        if removed {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// Removes the value at `index`, returning it.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn remove_take(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        let guard = Guard::new();
        let removed = core::take_slot(self.slot(index), &guard);
        if removed.is_some() {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// Removes the value at `index` if it passes `pred`: a single check-then-erase attempt.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn remove_if<P: FnOnce(&T) -> bool>(&self, index: usize, pred: P) -> bool {
        let guard = Guard::new();
        let removed = core::clear_slot_if(self.slot(index), pred, &guard);
        if removed {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// [`remove_if`](Self::remove_if), additionally returning the removed value.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn remove_take_if<P: FnOnce(&T) -> bool>(&self, index: usize, pred: P) -> Option<T>
    where
        T: Clone,
    {
        let guard = Guard::new();
        let removed = core::take_slot_if(self.slot(index), pred, &guard);
        if removed.is_some() {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// Reads the value at `index` with the supplied closure.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn read<R, F: FnOnce(&T) -> R>(&self, index: usize, reader: F) -> Option<R> {
        let guard = Guard::new();
        core::read_slot(self.slot(index), &guard).map(reader)
    }

    /// Returns a clone of the value at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.read(index, Clone::clone)
    }

    /// Replaces the value at `index` with `update(current)` if `pred(current)` passes: a
    /// single read-check-exchange attempt.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{FixedSizeBucket, UpdateOutcome};
    ///
    /// let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(4);
    ///
    /// assert!(bucket.insert(1, 1).is_ok());
    /// assert_eq!(bucket.update(1, |v| v * 10, |_| true), UpdateOutcome::Updated);
    /// assert_eq!(bucket.get(1), Some(10));
    /// ```
    #[inline]
    pub fn update<U, P>(&self, index: usize, update: U, pred: P) -> UpdateOutcome
    where
        U: FnOnce(&T) -> T,
        P: FnOnce(&T) -> bool,
    {
        let guard = Guard::new();
        core::update_slot(self.slot(index), update, pred, &guard)
    }

    /// Copies the values into `dst` in ascending index order, returning the number of values
    /// copied; copying stops when `dst` is full.
    #[inline]
    pub fn copy_to(&self, dst: &mut [T]) -> usize
    where
        T: Clone,
    {
        let guard = Guard::new();
        let mut copied = 0;
        for ((_, value), slot) in self.iter(&guard).zip(dst.iter_mut()) {
            *slot = value.clone();
            copied += 1;
        }
        copied
    }

    /// Returns an ascending iterator over the occupied indices and their values.
    ///
    /// The iterator is weakly consistent and never invalidated by concurrent mutation.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{FixedSizeBucket, Guard};
    ///
    /// let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(16);
    ///
    /// assert!(bucket.insert(10, 1).is_ok());
    /// assert!(bucket.insert(2, 2).is_ok());
    ///
    /// let guard = Guard::new();
    /// let entries: Vec<(usize, u32)> = bucket.iter(&guard).map(|(i, v)| (i, *v)).collect();
    /// assert_eq!(entries, vec![(2, 2), (10, 1)]);
    /// ```
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            bucket: self,
            guard,
            index: 0,
        }
    }

    #[inline]
    fn slot(&self, index: usize) -> &AtomicShared<Slot<T>> {
        assert!(index < self.capacity, "index out of bounds: {index}");
        &self.slots[index]
    }
}

impl<T: 'static> Drop for FixedSizeBucket<T> {
    fn drop(&mut self) {
        self.reservoir
            .slots
            .donate_array(std::mem::take(&mut self.slots));
    }
}

impl<T: 'static + PartialEq> PartialEq for FixedSizeBucket<T> {
    /// Returns `true` if the two buckets hold identical values at identical indices.
    ///
    /// The comparison is only meaningful in the absence of concurrent writers.
    fn eq(&self, other: &Self) -> bool {
        if self.capacity != other.capacity {
            return false;
        }
        let guard = Guard::new();
        let mut lhs = self.iter(&guard);
        let mut rhs = other.iter(&guard);
        loop {
            match (lhs.next(), rhs.next()) {
                (None, None) => return true,
                (Some(l), Some(r)) if l == r => (),
                _ => return false,
            }
        }
    }
}

impl<T: 'static + Debug> Debug for FixedSizeBucket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

/// An iterator over the occupied entries of a [`FixedSizeBucket`].
pub struct Iter<'g, T: 'static> {
    bucket: &'g FixedSizeBucket<T>,
    guard: &'g Guard,
    index: usize,
}

impl<'g, T: 'static> Iterator for Iter<'g, T> {
    type Item = (usize, &'g T);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.bucket.capacity {
            let index = self.index;
            self.index += 1;
            if let Some(value) = self.bucket.slots[index]
                .load(Acquire, self.guard)
                .as_ref()
                .and_then(Slot::value)
            {
                return Some((index, value));
            }
        }
        None
    }
}

impl<T: 'static> std::iter::FusedIterator for Iter<'_, T> {}

impl<T: 'static> Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").finish_non_exhaustive()
    }
}
