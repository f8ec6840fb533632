//! [`ArrayReservoir`] is a size-classed pool of reusable fixed-capacity arrays.

use std::cell::{RefCell, UnsafeCell};
use std::sync::atomic::Ordering::{AcqRel, Relaxed};

use sdd::{AtomicShared, Guard, Ptr, Shared, Tag};

use crate::exit_guard::ExitGuard;

/// The shortest array length the reservoir retains.
const MIN_LEN: usize = 8;

/// The longest array length the reservoir retains.
const MAX_LEN: usize = 1024;

/// The number of size classes: every power of two in `[MIN_LEN, MAX_LEN]`.
const NUM_CLASSES: usize = (MAX_LEN / MIN_LEN).ilog2() as usize + 1;

/// The number of arrays a single size class retains.
const POOL_CAPACITY: usize = 16;

/// A size-classed pool of reusable fixed-capacity arrays.
///
/// Bucket structures borrow their backing arrays from an [`ArrayReservoir`] when they create a
/// tree node, and donate them back when the node is dropped, avoiding allocation churn as the
/// structures grow and shrink. Pool operations are lock-free and best-effort: a failed attempt
/// to park or reuse an array falls back to dropping or allocating one.
///
/// An [`ArrayReservoir`] is an explicitly constructed, explicitly owned object; dropping it
/// releases every retained array.
///
/// # Examples
///
/// ```
/// use scb::ArrayReservoir;
///
/// let reservoir: ArrayReservoir<u64> = ArrayReservoir::new();
///
/// let array = reservoir.get_array(20);
/// assert_eq!(array.len(), 32);
/// assert!(array.iter().all(|e| *e == 0));
///
/// reservoir.donate_array(array);
/// ```
pub struct ArrayReservoir<T: Default> {
    pools: [Pool<T>; NUM_CLASSES],
}

/// A bounded, lock-free pool of arrays of a single length.
struct Pool<T> {
    slots: [AtomicShared<Cradle<T>>; POOL_CAPACITY],
}

/// A parked array; the payload is only touched by the thread that swapped the [`Cradle`] out
/// of its pool slot.
struct Cradle<T> {
    array: UnsafeCell<Option<Box<[T]>>>,
}

thread_local! {
    /// Pools with a donation in flight on the current thread, identified by the reservoir
    /// address and the size class.
    ///
    /// Re-defaulting a donated array can drop bucket nodes whose own `Drop` donates arrays to
    /// the same pool; the nested donation is suppressed to bound the recursion. A nested
    /// donation into a different pool, even one of the same size class in another reservoir,
    /// proceeds normally.
    static DONATIONS_IN_FLIGHT: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

impl<T: 'static + Default> ArrayReservoir<T> {
    /// Creates an empty [`ArrayReservoir`].
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::ArrayReservoir;
    ///
    /// let reservoir: ArrayReservoir<usize> = ArrayReservoir::new();
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: std::array::from_fn(|_| Pool::new()),
        }
    }

    /// Returns an array whose length is the next power of two greater than or equal to
    /// `capacity`, with a minimum length of `8`, and with every element set to
    /// `T::default()`.
    ///
    /// A pooled array of the exact length is reused when one is available; otherwise a new
    /// array is allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::ArrayReservoir;
    ///
    /// let reservoir: ArrayReservoir<u8> = ArrayReservoir::new();
    ///
    /// assert_eq!(reservoir.get_array(0).len(), 8);
    /// assert_eq!(reservoir.get_array(100).len(), 128);
    /// ```
    #[inline]
    pub fn get_array(&self, capacity: usize) -> Box<[T]> {
        let len = capacity.max(MIN_LEN).next_power_of_two();
        if len <= MAX_LEN {
            if let Some(array) = self.pools[class_of(len)].unpark() {
                return array;
            }
        }
        (0..len).map(|_| T::default()).collect()
    }

    /// Donates an array to the pool of the matching size class.
    ///
    /// Every element is reset to `T::default()` before the array is parked, so a later
    /// [`get_array`](Self::get_array) never observes stale data. Arrays whose length is not an
    /// exact power of two in `[8, 1024]` are silently dropped, as are donations into a size
    /// class whose pool is full.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::ArrayReservoir;
    ///
    /// let reservoir: ArrayReservoir<u64> = ArrayReservoir::new();
    ///
    /// let mut array = reservoir.get_array(8);
    /// array[3] = 11;
    /// reservoir.donate_array(array);
    ///
    /// // The pooled array comes back zeroed.
    /// assert!(reservoir.get_array(8).iter().all(|e| *e == 0));
    /// ```
    #[inline]
    pub fn donate_array(&self, mut array: Box<[T]>) {
        let len = array.len();
        if !len.is_power_of_two() || !(MIN_LEN..=MAX_LEN).contains(&len) {
            return;
        }
        let class = class_of(len);
        let pool_id = (self as *const Self as usize, class);
        let entered = DONATIONS_IN_FLIGHT
            .try_with(|in_flight| {
                let mut in_flight = in_flight.borrow_mut();
                if in_flight.contains(&pool_id) {
                    false
                } else {
                    in_flight.push(pool_id);
                    true
                }
            })
            .unwrap_or(false);
        if !entered {
            // A nested donation to the same pool: drop the array.
            return;
        }
        let _exit_guard = ExitGuard::new(|| {
            let _ = DONATIONS_IN_FLIGHT.try_with(|in_flight| {
                in_flight.borrow_mut().retain(|id| *id != pool_id);
            });
        });
        for element in array.iter_mut() {
            *element = T::default();
        }
        self.pools[class].park(array);
    }
}

impl<T: 'static + Default> Default for ArrayReservoir<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> std::fmt::Debug for ArrayReservoir<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayReservoir").finish_non_exhaustive()
    }
}

/// Returns the size class of an array length that is a power of two in `[MIN_LEN, MAX_LEN]`.
#[inline]
const fn class_of(len: usize) -> usize {
    (len.trailing_zeros() - MIN_LEN.trailing_zeros()) as usize
}

impl<T: 'static> Pool<T> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicShared::null()),
        }
    }

    /// Parks an array in the first empty slot; the array is dropped if every slot is taken.
    fn park(&self, array: Box<[T]>) {
        if array.is_empty() {
            return;
        }
        let guard = Guard::new();
        let mut cradle = Some(Shared::new(Cradle {
            array: UnsafeCell::new(Some(array)),
        }));
        for slot in &self.slots {
            if !slot.is_null(Relaxed) {
                continue;
            }
            match slot.compare_exchange(
                Ptr::null(),
                (cradle.take(), Tag::None),
                AcqRel,
                Relaxed,
                &guard,
            ) {
                Ok(_) => return,
                Err((returned, _)) => cradle = returned,
            }
        }
    }

    /// Takes an array out of the pool, if any slot holds one.
    fn unpark(&self) -> Option<Box<[T]>> {
        for slot in &self.slots {
            if slot.is_null(Relaxed) {
                continue;
            }
            let (taken, _) = slot.swap((None, Tag::None), AcqRel);
            if let Some(cradle) = taken {
                // The swap transferred the only strong reference to the cradle, and only the
                // winner of the swap touches the payload.
                if let Some(array) = unsafe { (*cradle.array.get()).take() } {
                    return Some(array);
                }
            }
        }
        None
    }
}

unsafe impl<T: Send> Send for Cradle<T> {}
unsafe impl<T: Send> Sync for Cradle<T> {}
