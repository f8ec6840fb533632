//! [`Bucket`] is an unbounded, integer-indexed concurrent sparse array.

pub(crate) mod core;

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use sdd::Guard;

use self::core::{BucketCore, Scan, SlotReservoir};

/// An unbounded, integer-indexed concurrent sparse array.
///
/// A [`Bucket`] stores at most one value per index over an index space of `32^7` and performs
/// every element operation wait-free: a slot access resolves through at most seven levels of a
/// 32-way radix tree, each visited node performing a constant number of atomic operations.
/// Tree nodes are created lazily on first insertion into an unexplored index region, with
/// their backing arrays borrowed from a shared [`BucketReservoir`].
///
/// There are no locks anywhere in the structure; operations that lose a race with a concurrent
/// writer report the loss instead of waiting, and enumeration is weakly consistent rather than
/// a point-in-time snapshot.
///
/// # Examples
///
/// ```
/// use scb::Bucket;
///
/// let bucket: Bucket<u32> = Bucket::new();
///
/// assert!(bucket.insert(5, 10).is_ok());
/// assert_eq!(bucket.insert(5, 20), Err(20));
/// assert_eq!(bucket.get(5), Some(10));
/// assert!(bucket.remove(5));
/// assert_eq!(bucket.get(5), None);
/// ```
pub struct Bucket<T: 'static> {
    core: BucketCore<T>,
    len: AtomicUsize,
}

/// A shareable pool of backing arrays for [`Bucket`] and
/// [`FixedSizeBucket`](crate::FixedSizeBucket) instances.
///
/// Buckets constructed over the same reservoir reuse each other's retired node arrays. The
/// reservoir is dropped, along with every array it retains, once the last bucket holding it
/// is dropped.
///
/// # Examples
///
/// ```
/// use scb::{Bucket, BucketReservoir};
///
/// let reservoir: BucketReservoir<u64> = BucketReservoir::new();
/// let first: Bucket<u64> = Bucket::with_reservoir(&reservoir);
/// let second: Bucket<u64> = Bucket::with_reservoir(&reservoir);
///
/// assert!(first.insert(0, 1).is_ok());
/// assert!(second.insert(0, 1).is_ok());
/// ```
pub struct BucketReservoir<T: 'static> {
    inner: Arc<SlotReservoir<T>>,
}

/// The outcome of a single-attempt [`Bucket::update`] or
/// [`FixedSizeBucket::update`](crate::FixedSizeBucket::update).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// The replacement value was stored.
    Updated,

    /// The predicate rejected the current value; nothing was modified.
    Rejected,

    /// A concurrent writer changed the slot between the read and the exchange; callers that
    /// need a definitive outcome retry the operation themselves.
    Lost,

    /// The slot holds no value.
    Vacant,
}

impl UpdateOutcome {
    /// Returns `true` if the replacement value was stored.
    #[inline]
    #[must_use]
    pub fn is_updated(self) -> bool {
        self == UpdateOutcome::Updated
    }
}

impl<T: 'static> Bucket<T> {
    /// The number of addressable indices: `32^7`, saturated to the platform word size.
    pub const CAPACITY: usize = core::CAPACITY;

    /// Creates an empty [`Bucket`] with its own [`BucketReservoir`].
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<usize> = Bucket::new();
    /// assert_eq!(bucket.len(), 0);
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_reservoir(&BucketReservoir::new())
    }

    /// Creates an empty [`Bucket`] borrowing its backing arrays from the given reservoir.
    #[inline]
    #[must_use]
    pub fn with_reservoir(reservoir: &BucketReservoir<T>) -> Self {
        Self {
            core: BucketCore::new(core::MAX_LEVEL, &reservoir.inner),
            len: AtomicUsize::new(0),
        }
    }

    /// Returns the number of values in the [`Bucket`].
    ///
    /// The counter is maintained on empty-to-occupied and occupied-to-empty transitions; it
    /// is exact in any quiescent state but may transiently disagree with an enumeration while
    /// writers are in flight.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u8> = Bucket::new();
    /// assert!(bucket.insert(1000, 7).is_ok());
    /// assert_eq!(bucket.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Relaxed)
    }

    /// Returns `true` if the [`Bucket`] holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of addressable indices.
    #[inline]
    pub fn capacity(&self) -> usize {
        Self::CAPACITY
    }

    /// Stores `item` at `index` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns the item back if the slot is occupied or a concurrent writer wins the race:
    /// a single wait-free attempt, never a retry loop.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<&str> = Bucket::new();
    ///
    /// assert!(bucket.insert(11, "eleven").is_ok());
    /// assert_eq!(bucket.insert(11, "other"), Err("other"));
    /// ```
    #[inline]
    pub fn insert(&self, index: usize, item: T) -> Result<(), T> {
        self.check_index(index);
        let guard = Guard::new();
        let mut item = Some(item);
        let inserted = self.core.apply_grow(
            index,
            &mut |slot, guard| match item.take() {
                Some(value) => match core::try_insert(slot, value, guard) {
                    Ok(()) => true,
                    Err(value) => {
                        item = Some(value);
                        false
                    }
                },
                None => false,
            },
            &guard,
        );
        if inserted {
            self.len.fetch_add(1, Relaxed);
            Ok(())
        } else {
            debug_assert!(item.is_some());
            item.take().map_or(Ok(()), Err)
        }
    }

    /// Stores `item` at `index` if the slot is empty; otherwise hands the item back together
    /// with a snapshot of the occupying value.
    ///
    /// The occupant snapshot is `None` when the occupying value is removed between the failed
    /// insertion and the read.
    ///
    /// # Errors
    ///
    /// Returns `(item, occupant)` if the slot is occupied.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert_or_get(3, 1).is_ok());
    /// assert_eq!(bucket.insert_or_get(3, 2), Err((2, Some(1))));
    /// ```
    #[inline]
    pub fn insert_or_get(&self, index: usize, item: T) -> Result<(), (T, Option<T>)>
    where
        T: Clone,
    {
        self.check_index(index);
        let guard = Guard::new();
        let mut item = Some(item);
        let mut occupant = None;
        let inserted = self.core.apply_grow(
            index,
            &mut |slot, guard| match item.take() {
                Some(value) => match core::try_insert(slot, value, guard) {
                    Ok(()) => true,
                    Err(value) => {
                        occupant = core::read_slot(slot, guard).cloned();
                        item = Some(value);
                        false
                    }
                },
                None => false,
            },
            &guard,
        );
        if inserted {
            self.len.fetch_add(1, Relaxed);
            Ok(())
        } else {
            debug_assert!(item.is_some());
            item.take().map_or(Ok(()), |item| Err((item, occupant)))
        }
    }

    /// Unconditionally stores `item` at `index`, returning the previous value.
    ///
    /// The length is only adjusted when the slot was empty.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert_eq!(bucket.exchange(7, 1), None);
    /// assert_eq!(bucket.exchange(7, 2), Some(1));
    /// assert_eq!(bucket.len(), 1);
    /// ```
    #[inline]
    pub fn exchange(&self, index: usize, item: T) -> Option<T>
    where
        T: Clone,
    {
        self.check_index(index);
        let guard = Guard::new();
        let mut item = Some(item);
        let mut previous = None;
        let was_empty = self.core.apply_grow(
            index,
            &mut |slot, guard| match item.take() {
                Some(value) => {
                    previous = core::exchange_slot(slot, value, guard);
                    previous.is_none()
                }
                None => false,
            },
            &guard,
        );
        if was_empty {
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
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.set(0, 1));
    /// assert!(!bucket.set(0, 2));
    /// ```
    #[inline]
    pub fn set(&self, index: usize, item: T) -> bool {
        self.check_index(index);
        let guard = Guard::new();
        let mut item = Some(item);
        let was_empty = self.core.apply_grow(
            index,
            &mut |slot, guard| match item.take() {
                Some(value) => core::overwrite_slot(slot, value, guard),
                None => false,
            },
            &guard,
        );
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
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(31, 1).is_ok());
    /// assert!(bucket.remove(31));
    /// assert!(!bucket.remove(31));
    /// ```
    #[inline]
    pub fn remove(&self, index: usize) -> bool {
        self.check_index(index);
        let guard = Guard::new();
        let removed = self
            .core
            .apply_shrink(index, &mut |slot, guard| core::clear_slot(slot, guard), &guard);
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
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(8, 64).is_ok());
    /// assert_eq!(bucket.remove_take(8), Some(64));
    /// assert_eq!(bucket.remove_take(8), None);
    /// ```
    #[inline]
    pub fn remove_take(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.check_index(index);
        let guard = Guard::new();
        let mut removed = None;
        self.core.apply_shrink(
            index,
            &mut |slot, guard| {
                removed = core::take_slot(slot, guard);
                removed.is_some()
            },
            &guard,
        );
        if removed.is_some() {
            self.len.fetch_sub(1, Relaxed);
        }
        removed
    }

    /// Removes the value at `index` if it passes `pred`.
    ///
    /// This is a single check-then-erase attempt: if the predicate rejects the value, or a
    /// concurrent writer changes the slot between the check and the erasure, the call reports
    /// `false` instead of retrying.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(2, 17).is_ok());
    /// assert!(!bucket.remove_if(2, |v| *v % 2 == 0));
    /// assert!(bucket.remove_if(2, |v| *v % 2 == 1));
    /// ```
    #[inline]
    pub fn remove_if<P: FnOnce(&T) -> bool>(&self, index: usize, pred: P) -> bool {
        self.check_index(index);
        let guard = Guard::new();
        let mut pred = Some(pred);
        let removed = self.core.apply_shrink(
            index,
            &mut |slot, guard| match pred.take() {
                Some(pred) => core::clear_slot_if(slot, pred, guard),
                None => false,
            },
            &guard,
        );
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
        self.check_index(index);
        let guard = Guard::new();
        let mut pred = Some(pred);
        let mut removed = None;
        self.core.apply_shrink(
            index,
            &mut |slot, guard| match pred.take() {
                Some(pred) => {
                    removed = core::take_slot_if(slot, pred, guard);
                    removed.is_some()
                }
                None => false,
            },
            &guard,
        );
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
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<String> = Bucket::new();
    ///
    /// assert!(bucket.insert(4, "four".to_string()).is_ok());
    /// assert_eq!(bucket.read(4, |v| v.len()), Some(4));
    /// assert_eq!(bucket.read(5, |v| v.len()), None);
    /// ```
    #[inline]
    pub fn read<R, F: FnOnce(&T) -> R>(&self, index: usize, reader: F) -> Option<R> {
        self.check_index(index);
        let guard = Guard::new();
        let mut reader = Some(reader);
        let mut result = None;
        self.core.apply(
            index,
            &mut |slot, guard| match core::read_slot(slot, guard) {
                Some(value) => {
                    if let Some(reader) = reader.take() {
                        result = Some(reader(value));
                    }
                    true
                }
                None => false,
            },
            &guard,
        );
        result
    }

    /// Returns a clone of the value at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(9, 81).is_ok());
    /// assert_eq!(bucket.get(9), Some(81));
    /// ```
    #[inline]
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.read(index, Clone::clone)
    }

    /// Replaces the value at `index` with `update(current)` if `pred(current)` passes.
    ///
    /// This is a single read-check-exchange attempt: a lost race with a concurrent writer
    /// reports [`UpdateOutcome::Lost`] without retrying; callers needing a definitive outcome
    /// loop themselves, the way [`HashMap::upsert_with`](crate::HashMap::upsert_with) does.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{Bucket, UpdateOutcome};
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(6, 1).is_ok());
    /// assert_eq!(bucket.update(6, |v| v + 1, |_| true), UpdateOutcome::Updated);
    /// assert_eq!(bucket.update(6, |v| v + 1, |v| *v == 1), UpdateOutcome::Rejected);
    /// assert_eq!(bucket.update(60, |v| v + 1, |_| true), UpdateOutcome::Vacant);
    /// assert_eq!(bucket.get(6), Some(2));
    /// ```
    #[inline]
    pub fn update<U, P>(&self, index: usize, update: U, pred: P) -> UpdateOutcome
    where
        U: FnOnce(&T) -> T,
        P: FnOnce(&T) -> bool,
    {
        self.check_index(index);
        let guard = Guard::new();
        let mut fns = Some((update, pred));
        let mut outcome = UpdateOutcome::Vacant;
        self.core.apply(
            index,
            &mut |slot, guard| match fns.take() {
                Some((update, pred)) => {
                    outcome = core::update_slot(slot, update, pred, guard);
                    outcome.is_updated()
                }
                None => false,
            },
            &guard,
        );
        outcome
    }

    /// Copies the values into `dst` in ascending index order, returning the number of values
    /// copied; copying stops when `dst` is full.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::Bucket;
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(50, 1).is_ok());
    /// assert!(bucket.insert(5, 2).is_ok());
    ///
    /// let mut dst = [0; 4];
    /// assert_eq!(bucket.copy_to(&mut dst), 2);
    /// assert_eq!(dst, [2, 1, 0, 0]);
    /// ```
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
    /// The iterator is a finite, single-pass, weakly consistent view: entries inserted or
    /// removed concurrently may or may not be observed, and the iterator is never
    /// invalidated by concurrent mutation.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{Bucket, Guard};
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    ///
    /// assert!(bucket.insert(70, 1).is_ok());
    /// assert!(bucket.insert(7, 2).is_ok());
    ///
    /// let guard = Guard::new();
    /// let entries: Vec<(usize, u32)> = bucket.iter(&guard).map(|(i, v)| (i, *v)).collect();
    /// assert_eq!(entries, vec![(7, 2), (70, 1)]);
    /// ```
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            scan: Scan::new(&self.core, 0, Self::CAPACITY - 1, guard),
        }
    }

    /// Returns an iterator over the occupied indices in `[first, last]`, both inclusive; the
    /// order is descending when `first > last`.
    ///
    /// # Panics
    ///
    /// Panics if either bound is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{Bucket, Guard};
    ///
    /// let bucket: Bucket<u32> = Bucket::new();
    /// for index in 0..10 {
    ///     assert!(bucket.insert(index, index as u32).is_ok());
    /// }
    ///
    /// let guard = Guard::new();
    /// let forward: Vec<usize> = bucket.range(2, 4, &guard).map(|(i, _)| i).collect();
    /// assert_eq!(forward, vec![2, 3, 4]);
    ///
    /// let backward: Vec<usize> = bucket.range(4, 2, &guard).map(|(i, _)| i).collect();
    /// assert_eq!(backward, vec![4, 3, 2]);
    /// ```
    #[inline]
    pub fn range<'g>(&'g self, first: usize, last: usize, guard: &'g Guard) -> Iter<'g, T> {
        self.check_index(first);
        self.check_index(last);
        Iter {
            scan: Scan::new(&self.core, first, last, guard),
        }
    }

    #[inline]
    fn check_index(&self, index: usize) {
        assert!(index < Self::CAPACITY, "index out of bounds: {index}");
    }
}

impl<T: 'static> Default for Bucket<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static + Debug> Debug for Bucket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<T: 'static> BucketReservoir<T> {
    /// Creates an empty [`BucketReservoir`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotReservoir::new()),
        }
    }

    /// Returns the inner reservoir handle.
    #[inline]
    pub(crate) fn inner(&self) -> &Arc<SlotReservoir<T>> {
        &self.inner
    }
}

impl<T: 'static> Clone for BucketReservoir<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for BucketReservoir<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Debug for BucketReservoir<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketReservoir").finish_non_exhaustive()
    }
}

/// An iterator over the occupied entries of a [`Bucket`].
pub struct Iter<'g, T: 'static> {
    scan: Scan<'g, T>,
}

impl<'g, T: 'static> Iterator for Iter<'g, T> {
    type Item = (usize, &'g T);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.scan.next()
    }
}

impl<T: 'static> std::iter::FusedIterator for Iter<'_, T> {}

impl<T: 'static> Debug for Iter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").finish_non_exhaustive()
    }
}
