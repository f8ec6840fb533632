//! [`HashMap`] is a lock-free concurrent hash map.

use std::collections::hash_map::RandomState;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use sdd::Guard;

use crate::bucket::{core, Bucket};
use crate::Equivalent;

/// Home indices are confined to the lower half of the index space, leaving the upper half as
/// probing headroom so a probe sequence never runs off the end of the [`Bucket`].
const HOME_SPAN: usize = core::CAPACITY / 2;

/// A lock-free concurrent hash map.
///
/// [`HashMap`] stores its entries in a [`Bucket`] and resolves collisions by linear probing:
/// an entry's home index is derived from its key hash, and colliding entries spill into the
/// slots immediately after it. The probe window is shared by all keys and only ever grows, so
/// a reader scanning `[home, home + probing)` observes every entry that was ever reachable;
/// nothing is rehashed and no resize ever blocks a concurrent operation.
///
/// Entries are never moved once inserted, so references handed out during guarded iteration
/// remain valid for the lifetime of the [`Guard`].
///
/// # Examples
///
/// ```
/// use scb::HashMap;
///
/// let map: HashMap<u64, u32> = HashMap::new();
///
/// assert!(map.insert(1, 10).is_ok());
/// assert_eq!(map.insert(1, 11), Err((1, 11)));
/// assert_eq!(map.get(&1), Some(10));
/// assert_eq!(map.remove(&1), Some((1, 10)));
/// assert!(map.is_empty());
/// ```
pub struct HashMap<K, V, H = RandomState>
where
    K: 'static,
    V: 'static,
    H: BuildHasher,
{
    bucket: Bucket<(K, V)>,
    probing: AtomicUsize,
    build_hasher: H,
}

impl<K, V> HashMap<K, V, RandomState>
where
    K: 'static,
    V: 'static,
{
    /// Creates an empty [`HashMap`] with the default hasher.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, H> HashMap<K, V, H>
where
    K: 'static,
    V: 'static,
    H: BuildHasher,
{
    /// Creates an empty [`HashMap`] with the given [`BuildHasher`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::hash_map::RandomState;
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32, RandomState> = HashMap::with_hasher(RandomState::new());
    /// assert_eq!(map.len(), 0);
    /// ```
    #[inline]
    pub fn with_hasher(build_hasher: H) -> Self {
        Self {
            bucket: Bucket::new(),
            probing: AtomicUsize::new(1),
            build_hasher,
        }
    }

    /// Returns a reference to the [`BuildHasher`].
    #[inline]
    pub fn hasher(&self) -> &H {
        &self.build_hasher
    }

    /// Returns the number of entries.
    ///
    /// Exact in any quiescent state; may transiently disagree with an enumeration while
    /// writers are in flight.
    #[inline]
    pub fn len(&self) -> usize {
        self.bucket.len()
    }

    /// Returns `true` if the [`HashMap`] is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty()
    }

    /// Returns the current width of the shared probe window.
    ///
    /// The window only ever widens; it never shrinks even when the colliding entries that
    /// widened it are removed.
    #[inline]
    pub fn probing(&self) -> usize {
        self.probing.load(Acquire)
    }

    /// Derives the home index of a key, confined to the lower half of the index space.
    #[inline]
    fn home_index<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % HOME_SPAN
    }

    /// Widens the probe window to at least `attempts` slots.
    fn extend_probing(&self, attempts: usize) {
        let mut current = self.probing.load(Relaxed);
        while current < attempts {
            match self
                .probing
                .compare_exchange(current, attempts, Release, Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl<K, V, H> HashMap<K, V, H>
where
    K: 'static + Eq + Hash,
    V: 'static,
    H: BuildHasher,
{
    /// Inserts a key-value pair.
    ///
    /// The probe window is widened before each probe attempt, so a concurrent reader that
    /// observes the entry also observes a window wide enough to reach it.
    ///
    /// # Errors
    ///
    /// Returns the pair back if the key is already present, or if the probe sequence exhausts
    /// the index space.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(map.insert(1, 0).is_ok());
    /// assert_eq!(map.insert(1, 1), Err((1, 1)));
    /// ```
    #[inline]
    pub fn insert(&self, key: K, val: V) -> Result<(), (K, V)> {
        match self.insert_entry((key, val)) {
            Ok(()) => Ok(()),
            Err((entry, _)) => Err(entry),
        }
    }

    /// Inserts `entry`, or reports the index of the entry occupying its key.
    fn insert_entry(&self, entry: (K, V)) -> Result<(), ((K, V), usize)> {
        let home = self.home_index(&entry.0);
        let mut entry = entry;
        let mut offset = 0;
        while offset < HOME_SPAN {
            self.extend_probing(offset + 1);
            let index = home + offset;
            match self.bucket.insert(index, entry) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    entry = returned;
                    match self.bucket.read(index, |(k, _)| *k == entry.0) {
                        Some(true) => return Err((entry, index)),
                        Some(false) => offset += 1,
                        // The occupant was removed in the interim: retry the same slot.
                        None => (),
                    }
                }
            }
        }
        Err((entry, home))
    }

    /// Reads the entry of `key` with the supplied closure.
    ///
    /// The key may be any borrowed form of `K` as long as it hashes identically.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<String, u32> = HashMap::new();
    ///
    /// assert!(map.insert("one".to_string(), 1).is_ok());
    /// assert_eq!(map.read("one", |_, v| *v), Some(1));
    /// assert_eq!(map.read("two", |_, v| *v), None);
    /// ```
    #[inline]
    pub fn read<Q, R, F>(&self, key: &Q, reader: F) -> Option<R>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        F: FnOnce(&K, &V) -> R,
    {
        let home = self.home_index(key);
        let probing = self.probing.load(Acquire).min(HOME_SPAN);
        let mut reader = Some(reader);
        for offset in 0..probing {
            let result = self
                .bucket
                .read(home + offset, |(k, v)| {
                    if key.equivalent(k) {
                        reader.take().map(|reader| reader(k, v))
                    } else {
                        None
                    }
                })
                .flatten();
            if result.is_some() {
                return result;
            }
        }
        None
    }

    /// Returns a clone of the value of `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(map.insert(19, 0).is_ok());
    /// assert_eq!(map.get(&19), Some(0));
    /// ```
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        V: Clone,
    {
        self.read(key, |_, v| v.clone())
    }

    /// Returns `true` if the [`HashMap`] contains an entry for `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(!map.contains(&1));
    /// assert!(map.insert(1, 0).is_ok());
    /// assert!(map.contains(&1));
    /// ```
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.read(key, |_, _| ()).is_some()
    }

    /// Removes the entry of `key`, returning it.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert_eq!(map.remove(&1), None);
    /// assert!(map.insert(1, 0).is_ok());
    /// assert_eq!(map.remove(&1), Some((1, 0)));
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<(K, V)>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
        V: Clone,
    {
        self.remove_if(key, |_, _| true)
    }

    /// Removes the entry of `key` if it passes `pred`, returning it.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(map.insert(1, 0).is_ok());
    /// assert_eq!(map.remove_if(&1, |_, v| *v == 1), None);
    /// assert_eq!(map.remove_if(&1, |_, v| *v == 0), Some((1, 0)));
    /// ```
    #[inline]
    pub fn remove_if<Q, P>(&self, key: &Q, mut pred: P) -> Option<(K, V)>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        P: FnMut(&K, &V) -> bool,
        K: Clone,
        V: Clone,
    {
        let home = self.home_index(key);
        let probing = self.probing.load(Acquire).min(HOME_SPAN);
        for offset in 0..probing {
            let removed = self
                .bucket
                .remove_take_if(home + offset, |(k, v)| key.equivalent(k) && pred(k, v));
            if removed.is_some() {
                return removed;
            }
        }
        None
    }

    /// Replaces the value of `key` with `updater(key, current)`.
    ///
    /// This is a single read-check-exchange attempt per probed slot: a race lost against a
    /// concurrent writer on the entry reports `false` without retrying.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(!map.update(&1, |_, v| v + 1));
    /// assert!(map.insert(1, 0).is_ok());
    /// assert!(map.update(&1, |_, v| v + 1));
    /// assert_eq!(map.get(&1), Some(1));
    /// ```
    #[inline]
    pub fn update<Q, U>(&self, key: &Q, mut updater: U) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
        U: FnMut(&K, &V) -> V,
        K: Clone,
    {
        let home = self.home_index(key);
        let probing = self.probing.load(Acquire).min(HOME_SPAN);
        for offset in 0..probing {
            let outcome = self.bucket.update(
                home + offset,
                |(k, v)| (k.clone(), updater(k, v)),
                |(k, _)| key.equivalent(k),
            );
            if outcome.is_updated() {
                return true;
            }
        }
        false
    }

    /// Stores `val` under `key`, replacing the value of an existing entry.
    ///
    /// Unlike [`update`](Self::update), this retries until the mapping is definitively
    /// established.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// map.upsert(1, 0);
    /// map.upsert(1, 1);
    /// assert_eq!(map.get(&1), Some(1));
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    pub fn upsert(&self, key: K, val: V)
    where
        K: Clone,
        V: Clone,
    {
        let mut entry = (key, val);
        loop {
            match self.insert_entry(entry) {
                Ok(()) => return,
                Err((returned, index)) => {
                    let outcome = self.bucket.update(
                        index,
                        |(k, _)| (k.clone(), returned.1.clone()),
                        |(k, _)| *k == returned.0,
                    );
                    if outcome.is_updated() {
                        return;
                    }
                    entry = returned;
                }
            }
        }
    }

    /// Returns the value of `key`, inserting one built by `factory` if absent.
    ///
    /// `factory` is called at most once; the freshly built value loses to a concurrent
    /// insertion of the same key, in which case the winner's value is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert_eq!(map.get_or_insert_with(1, || 7), 7);
    /// assert_eq!(map.get_or_insert_with(1, || 8), 7);
    /// ```
    #[inline]
    pub fn get_or_insert_with<F>(&self, key: K, factory: F) -> V
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        if let Some(current) = self.get(&key) {
            return current;
        }
        let mut entry = (key, factory());
        loop {
            let fresh = entry.1.clone();
            match self.insert_entry(entry) {
                Ok(()) => return fresh,
                Err((returned, _)) => {
                    if let Some(current) = self.get(&returned.0) {
                        return current;
                    }
                    entry = returned;
                }
            }
        }
    }

    /// Returns an iterator over the entries.
    ///
    /// The iterator is weakly consistent: entries inserted or removed concurrently may or may
    /// not be observed.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{Guard, HashMap};
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(map.insert(1, 0).is_ok());
    /// assert!(map.insert(2, 1).is_ok());
    ///
    /// let guard = Guard::new();
    /// assert_eq!(map.iter(&guard).count(), 2);
    /// ```
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K, V> {
        Iter {
            entries: self.bucket.iter(guard),
        }
    }

    /// Calls `f` on every entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(map.insert(1, 1).is_ok());
    /// assert!(map.insert(2, 2).is_ok());
    ///
    /// let mut sum = 0;
    /// map.for_each(|_, v| sum += *v);
    /// assert_eq!(sum, 3);
    /// ```
    #[inline]
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        let guard = Guard::new();
        for (k, v) in self.iter(&guard) {
            f(k, v);
        }
    }

    /// Retains the entries passing `pred`.
    ///
    /// Entries inserted concurrently may survive without being visited.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    /// for i in 0..10 {
    ///     assert!(map.insert(i, i as u32).is_ok());
    /// }
    ///
    /// map.retain(|_, v| *v % 2 == 0);
    /// assert_eq!(map.len(), 5);
    /// ```
    #[inline]
    pub fn retain<F: FnMut(&K, &V) -> bool>(&self, mut pred: F) {
        let guard = Guard::new();
        for (index, entry) in self.bucket.iter(&guard) {
            if !pred(&entry.0, &entry.1) {
                self.bucket.remove_if(index, |(k, v)| !pred(k, v));
            }
        }
    }

    /// Removes every entry.
    ///
    /// The probe window retains its width.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashMap;
    ///
    /// let map: HashMap<u64, u32> = HashMap::new();
    ///
    /// assert!(map.insert(1, 0).is_ok());
    /// map.clear();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    pub fn clear(&self) {
        let guard = Guard::new();
        for (index, _) in self.bucket.iter(&guard) {
            self.bucket.remove(index);
        }
    }
}

impl<K, V, H> Default for HashMap<K, V, H>
where
    K: 'static,
    V: 'static,
    H: BuildHasher + Default,
{
    #[inline]
    fn default() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K, V, H> Debug for HashMap<K, V, H>
where
    K: 'static + Debug + Eq + Hash,
    V: 'static + Debug,
    H: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<K, V, H> PartialEq for HashMap<K, V, H>
where
    K: 'static + Eq + Hash,
    V: 'static + PartialEq,
    H: BuildHasher,
{
    /// Returns `true` if the two maps hold an identical set of entries.
    ///
    /// The comparison is only meaningful in the absence of concurrent writers.
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let guard = Guard::new();
        self.iter(&guard)
            .all(|(k, v)| other.read(k, |_, other_v| v == other_v).unwrap_or(false))
    }
}

/// An iterator over the entries of a [`HashMap`].
pub struct Iter<'g, K: 'static, V: 'static> {
    entries: crate::bucket::Iter<'g, (K, V)>,
}

impl<'g, K: 'static, V: 'static> Iterator for Iter<'g, K, V> {
    type Item = (&'g K, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .next()
            .map(|(_, entry)| (&entry.0, &entry.1))
    }
}

impl<K: 'static, V: 'static> std::iter::FusedIterator for Iter<'_, K, V> {}

impl<K: 'static, V: 'static> Debug for Iter<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").finish_non_exhaustive()
    }
}
