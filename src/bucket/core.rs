//! [`BucketCore`] is the hierarchical node structure backing [`Bucket`](super::Bucket).
//!
//! A core is a 32-way radix tree of up to seven levels; the leaf level stores values, every
//! level above stores child nodes. Each node guards its 32 slots with a primary slot, a
//! staging slot, and a use-counter: the counter defers staging-slot teardown while an
//! operation is in flight, and the staging slot lets a racing creator hand a freshly built
//! child over to a concurrent cleanup instead of losing it.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::sync::Arc;

use sdd::{AtomicShared, Guard, Ptr, Shared, Tag};

use super::UpdateOutcome;
use crate::exit_guard::ExitGuard;
use crate::reservoir::ArrayReservoir;

/// The fan-out of every tree level.
pub(crate) const FAN_OUT: usize = 32;

/// The number of index bits consumed per level.
pub(crate) const FAN_OUT_LOG2: u32 = 5;

/// The maximum tree depth; a full-depth core addresses `32^7` indices.
pub(crate) const MAX_LEVEL: u8 = 7;

/// The index space of a full-depth core, saturated to the platform word size.
pub(crate) const CAPACITY: usize = capacity_of(MAX_LEVEL);

/// Returns the number of indices a core of the given level addresses.
pub(crate) const fn capacity_of(level: u8) -> usize {
    let bits = FAN_OUT_LOG2 * level as u32;
    if bits >= usize::BITS {
        usize::MAX
    } else {
        1_usize << bits
    }
}

/// The state of an occupied slot; an empty slot is a null [`AtomicShared`].
pub(crate) enum Slot<T: 'static> {
    /// A value stored at a leaf position.
    ///
    /// The `Option` is only `None` while an unpublished slot is dismantled to hand its value
    /// back to the caller; a published slot always holds `Some`.
    Value(Option<T>),

    /// A child node of the next lower level.
    Child(BucketCore<T>),
}

impl<T: 'static> Slot<T> {
    /// Returns the stored value, if this is an intact leaf slot.
    #[inline]
    pub(crate) fn value(&self) -> Option<&T> {
        if let Slot::Value(value) = self {
            value.as_ref()
        } else {
            None
        }
    }

    /// Moves the stored value out of the slot.
    #[inline]
    fn take_value(&mut self) -> Option<T> {
        if let Slot::Value(value) = self {
            value.take()
        } else {
            None
        }
    }
}

/// The array pools shared by every node of a bucket.
pub(crate) struct SlotReservoir<T: 'static> {
    pub(crate) slots: ArrayReservoir<AtomicShared<Slot<T>>>,
    counters: ArrayReservoir<AtomicUsize>,
}

impl<T: 'static> SlotReservoir<T> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            slots: ArrayReservoir::new(),
            counters: ArrayReservoir::new(),
        }
    }
}

/// A node of the hierarchical bucket tree.
pub(crate) struct BucketCore<T: 'static> {
    /// The level of this node; leaves are level `1`.
    level: u8,

    /// The primary slots: values at the leaf level, child nodes above it.
    first: Box<[AtomicShared<Slot<T>>]>,

    /// The staging slots, transiently holding a reference during child creation and removal.
    second: Box<[AtomicShared<Slot<T>>]>,

    /// Per-slot use-counters deferring staging teardown while an operation is in flight.
    use_count: Box<[AtomicUsize]>,

    /// The pools the slot arrays were borrowed from.
    reservoir: Arc<SlotReservoir<T>>,
}

impl<T: 'static> BucketCore<T> {
    /// Creates a node of the given level.
    ///
    /// # Panics
    ///
    /// Panics if `level` is outside `[1, 7]`: an unambiguous programmer error.
    pub(crate) fn new(level: u8, reservoir: &Arc<SlotReservoir<T>>) -> Self {
        assert!(
            (1..=MAX_LEVEL).contains(&level),
            "invalid bucket core level: {level}"
        );
        Self {
            level,
            first: reservoir.slots.get_array(FAN_OUT),
            second: reservoir.slots.get_array(FAN_OUT),
            use_count: reservoir.counters.get_array(FAN_OUT),
            reservoir: reservoir.clone(),
        }
    }

    /// Extracts the 5-bit chunk of `index` addressed by this node's level.
    #[inline]
    fn sub_index(&self, index: usize) -> usize {
        (index >> (FAN_OUT_LOG2 * (self.level - 1) as u32)) & (FAN_OUT - 1)
    }

    /// Applies `action` to the leaf slot of `index` if the path to it exists.
    ///
    /// Returns `false` without invoking `action` when any node on the path is absent,
    /// including one torn down by a concurrent cleanup: a benign race, not an error.
    pub(crate) fn apply<F>(&self, index: usize, action: &mut F, guard: &Guard) -> bool
    where
        F: FnMut(&AtomicShared<Slot<T>>, &Guard) -> bool,
    {
        let sub = self.sub_index(index);
        if self.level == 1 {
            return action(&self.first[sub], guard);
        }
        self.use_count[sub].fetch_add(1, Acquire);
        let _exit_guard = ExitGuard::new(|| self.leave(sub, guard));
        if let Some(Slot::Child(child)) = self.first[sub].load(Acquire, guard).as_ref() {
            child.apply(index, action, guard)
        } else {
            false
        }
    }

    /// Applies `action` to the leaf slot of `index`, lazily constructing missing nodes on
    /// the path; used by the inserting operations.
    pub(crate) fn apply_grow<F>(&self, index: usize, action: &mut F, guard: &Guard) -> bool
    where
        F: FnMut(&AtomicShared<Slot<T>>, &Guard) -> bool,
    {
        let sub = self.sub_index(index);
        if self.level == 1 {
            return action(&self.first[sub], guard);
        }
        self.use_count[sub].fetch_add(1, Acquire);
        let _exit_guard = ExitGuard::new(|| self.leave(sub, guard));
        self.ensure_child(sub, guard).apply_grow(index, action, guard)
    }

    /// Applies `action` to the leaf slot of `index`, reaching the child through a snapshot
    /// staged in the staging slot so the child outlives a concurrent teardown; used by the
    /// removing operations.
    pub(crate) fn apply_shrink<F>(&self, index: usize, action: &mut F, guard: &Guard) -> bool
    where
        F: FnMut(&AtomicShared<Slot<T>>, &Guard) -> bool,
    {
        let sub = self.sub_index(index);
        if self.level == 1 {
            return action(&self.first[sub], guard);
        }
        self.use_count[sub].fetch_add(1, Acquire);
        let _exit_guard = ExitGuard::new(|| self.leave(sub, guard));
        if self.second[sub].is_null(Acquire) {
            if let Some(current) = self.first[sub].get_shared(Acquire, guard) {
                let _ = self.second[sub].compare_exchange(
                    Ptr::null(),
                    (Some(current), Tag::None),
                    AcqRel,
                    Relaxed,
                    guard,
                );
            }
        }
        if let Some(Slot::Child(child)) = self.second[sub].load(Acquire, guard).as_ref() {
            child.apply_shrink(index, action, guard)
        } else {
            false
        }
    }

    /// Returns the child node of the given sub-slot, constructing it if absent.
    ///
    /// The new child is staged in the staging slot before being published to the primary
    /// slot, so a concurrent [`leave`](Self::leave) observing the staging entry republishes
    /// it instead of letting it vanish.
    fn ensure_child<'g>(&self, sub: usize, guard: &'g Guard) -> &'g BucketCore<T> {
        loop {
            let ptr = self.first[sub].load(Acquire, guard);
            if let Some(Slot::Child(child)) = ptr.as_ref() {
                return child;
            }
            let staged = if let Some(staged) = self.second[sub].get_shared(Acquire, guard) {
                staged
            } else {
                let created = Shared::new(Slot::Child(BucketCore::new(
                    self.level - 1,
                    &self.reservoir,
                )));
                match self.second[sub].compare_exchange(
                    Ptr::null(),
                    (Some(created), Tag::None),
                    AcqRel,
                    Acquire,
                    guard,
                ) {
                    Ok((_, ptr)) | Err((_, ptr)) => {
                        if ptr.is_null() {
                            // The staging slot was torn down in the interim.
                            continue;
                        }
                        match self.second[sub].get_shared(Acquire, guard) {
                            Some(staged) => staged,
                            None => continue,
                        }
                    }
                }
            };
            match self.first[sub].compare_exchange(
                ptr,
                (Some(staged), Tag::None),
                AcqRel,
                Acquire,
                guard,
            ) {
                Ok((_, ptr)) | Err((_, ptr)) => {
                    if let Some(Slot::Child(child)) = ptr.as_ref() {
                        return child;
                    }
                }
            }
        }
    }

    /// Decrements the use-counter of the given sub-slot and performs cleanup when it reaches
    /// zero.
    ///
    /// Cleanup erases the staging slot, then re-checks it against the primary: a staging
    /// entry that a racing creator published while the primary is still empty is restored
    /// into the primary instead of being dropped. The primary child link itself is retained;
    /// discarding a non-empty subtree that a racing thread is about to re-create would
    /// silently lose live entries, so child nodes are logically destructible but stay
    /// physically reachable for the lifetime of the tree.
    fn leave(&self, sub: usize, guard: &Guard) {
        if self.use_count[sub].fetch_sub(1, AcqRel) != 1 {
            return;
        }
        let (staged, _) = self.second[sub].swap((None, Tag::None), AcqRel);
        if let Some(staged) = staged {
            if self.first[sub].is_null(Acquire) {
                let _ = self.first[sub].compare_exchange(
                    Ptr::null(),
                    (Some(staged), Tag::None),
                    AcqRel,
                    Relaxed,
                    guard,
                );
            }
        }
    }
}

impl<T: 'static> Drop for BucketCore<T> {
    fn drop(&mut self) {
        // Donating re-defaults the slots, dropping any children; their own drop donates to
        // the same pools, bounded by the reservoir's reentry guard.
        let reservoir = self.reservoir.clone();
        reservoir.slots.donate_array(std::mem::take(&mut self.first));
        reservoir.slots.donate_array(std::mem::take(&mut self.second));
        reservoir
            .counters
            .donate_array(std::mem::take(&mut self.use_count));
    }
}

/// An ordered traversal over the occupied leaf slots of a core within index bounds.
///
/// The traversal is weakly consistent: it may observe some concurrent insertions and miss
/// others, and is never invalidated by concurrent mutation.
pub(crate) struct Scan<'g, T: 'static> {
    guard: &'g Guard,
    from: usize,
    to: usize,
    descending: bool,
    stack: Vec<Frame<'g, T>>,
}

struct Frame<'g, T: 'static> {
    node: &'g BucketCore<T>,
    base: usize,
    position: usize,
}

impl<'g, T: 'static> Scan<'g, T> {
    /// Creates a traversal over `[first, last]`; the order is descending when `first > last`.
    pub(crate) fn new(root: &'g BucketCore<T>, first: usize, last: usize, guard: &'g Guard) -> Self {
        Self {
            guard,
            from: first.min(last),
            to: first.max(last),
            descending: first > last,
            stack: vec![Frame {
                node: root,
                base: 0,
                position: 0,
            }],
        }
    }
}

impl<'g, T: 'static> Iterator for Scan<'g, T> {
    type Item = (usize, &'g T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, base, position) = {
                let frame = self.stack.last_mut()?;
                if frame.position == FAN_OUT {
                    self.stack.pop();
                    continue;
                }
                let position = frame.position;
                frame.position += 1;
                (frame.node, frame.base, position)
            };
            let sub = if self.descending {
                FAN_OUT - 1 - position
            } else {
                position
            };
            // Saturating arithmetic: on 32-bit targets the index space saturates to
            // `usize::MAX` and high subtrees are unreachable.
            let span = capacity_of(node.level - 1);
            let low = base.saturating_add(sub.saturating_mul(span));
            let high = low.saturating_add(span - 1);
            if high < self.from || low > self.to {
                continue;
            }
            match node.first[sub].load(Acquire, self.guard).as_ref() {
                Some(Slot::Value(value)) if node.level == 1 => {
                    if let Some(value) = value.as_ref() {
                        return Some((low, value));
                    }
                }
                Some(Slot::Child(child)) => {
                    self.stack.push(Frame {
                        node: child,
                        base: low,
                        position: 0,
                    });
                }
                _ => (),
            }
        }
    }
}

impl<T: 'static> std::iter::FusedIterator for Scan<'_, T> {}

/// Inserts `item` into an empty slot; hands it back if the slot is occupied or a concurrent
/// writer wins the race.
pub(crate) fn try_insert<T: 'static>(
    slot: &AtomicShared<Slot<T>>,
    item: T,
    guard: &Guard,
) -> Result<(), T> {
    let ptr = slot.load(Acquire, guard);
    if !ptr.is_null() {
        return Err(item);
    }
    let new = Shared::new(Slot::Value(Some(item)));
    match slot.compare_exchange(ptr, (Some(new), Tag::None), AcqRel, Relaxed, guard) {
        Ok(_) => Ok(()),
        Err((returned, _)) => {
            // The allocation was never published: take the item back out of it.
            Err(unsafe { reclaim_unpublished(returned).unwrap_unchecked() })
        }
    }
}

/// Takes the value back out of a slot allocation that never became visible to other threads.
unsafe fn reclaim_unpublished<T: 'static>(shared: Option<Shared<Slot<T>>>) -> Option<T> {
    let mut shared = shared?;
    shared.get_mut().and_then(Slot::take_value)
}

/// Unconditionally stores `item`, returning the previous value.
pub(crate) fn exchange_slot<T: 'static + Clone>(
    slot: &AtomicShared<Slot<T>>,
    item: T,
    _guard: &Guard,
) -> Option<T> {
    let (previous, _) = slot.swap((Some(Shared::new(Slot::Value(Some(item)))), Tag::None), AcqRel);
    previous.and_then(|previous| previous.value().cloned())
}

/// Unconditionally stores `item`, reporting whether the slot was empty.
pub(crate) fn overwrite_slot<T: 'static>(
    slot: &AtomicShared<Slot<T>>,
    item: T,
    _guard: &Guard,
) -> bool {
    let (previous, _) = slot.swap((Some(Shared::new(Slot::Value(Some(item)))), Tag::None), AcqRel);
    previous.is_none()
}

/// Empties the slot, reporting whether a value was removed.
pub(crate) fn clear_slot<T: 'static>(slot: &AtomicShared<Slot<T>>, _guard: &Guard) -> bool {
    let (previous, _) = slot.swap((None, Tag::None), AcqRel);
    previous.is_some()
}

/// Empties the slot, returning the removed value.
pub(crate) fn take_slot<T: 'static + Clone>(
    slot: &AtomicShared<Slot<T>>,
    _guard: &Guard,
) -> Option<T> {
    let (previous, _) = slot.swap((None, Tag::None), AcqRel);
    previous.and_then(|previous| previous.value().cloned())
}

/// Empties the slot if the current value passes `pred`: a single check-then-erase attempt
/// that reports `false` when a concurrent writer changes the slot in the interim.
pub(crate) fn clear_slot_if<T: 'static, P: FnOnce(&T) -> bool>(
    slot: &AtomicShared<Slot<T>>,
    pred: P,
    guard: &Guard,
) -> bool {
    let ptr = slot.load(Acquire, guard);
    let Some(value) = ptr.as_ref().and_then(Slot::value) else {
        return false;
    };
    if !pred(value) {
        return false;
    }
    slot.compare_exchange(ptr, (None, Tag::None), AcqRel, Relaxed, guard)
        .is_ok()
}

/// [`clear_slot_if`], additionally returning the removed value.
pub(crate) fn take_slot_if<T: 'static + Clone, P: FnOnce(&T) -> bool>(
    slot: &AtomicShared<Slot<T>>,
    pred: P,
    guard: &Guard,
) -> Option<T> {
    let ptr = slot.load(Acquire, guard);
    let value = ptr.as_ref().and_then(Slot::value)?;
    if !pred(value) {
        return None;
    }
    match slot.compare_exchange(ptr, (None, Tag::None), AcqRel, Relaxed, guard) {
        Ok((removed, _)) => removed.and_then(|removed| removed.value().cloned()),
        Err(_) => None,
    }
}

/// Replaces the current value with `update(current)` if `pred(current)` passes: a single
/// read-check-exchange attempt without an internal retry loop.
pub(crate) fn update_slot<T: 'static, U, P>(
    slot: &AtomicShared<Slot<T>>,
    update: U,
    pred: P,
    guard: &Guard,
) -> UpdateOutcome
where
    U: FnOnce(&T) -> T,
    P: FnOnce(&T) -> bool,
{
    let ptr = slot.load(Acquire, guard);
    let Some(current) = ptr.as_ref().and_then(Slot::value) else {
        return UpdateOutcome::Vacant;
    };
    if !pred(current) {
        return UpdateOutcome::Rejected;
    }
    let new = Shared::new(Slot::Value(Some(update(current))));
    match slot.compare_exchange(ptr, (Some(new), Tag::None), AcqRel, Relaxed, guard) {
        Ok(_) => UpdateOutcome::Updated,
        Err(_) => UpdateOutcome::Lost,
    }
}

/// Reads the current value of the slot.
#[inline]
pub(crate) fn read_slot<'g, T: 'static>(
    slot: &AtomicShared<Slot<T>>,
    guard: &'g Guard,
) -> Option<&'g T> {
    slot.load(Acquire, guard).as_ref().and_then(Slot::value)
}
