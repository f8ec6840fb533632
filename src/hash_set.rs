//! [`HashSet`] is a lock-free concurrent hash set.

use std::collections::hash_map::RandomState;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash};

use sdd::Guard;

use crate::hash_map;
use crate::Equivalent;
use crate::HashMap;

/// A lock-free concurrent hash set.
///
/// [`HashSet`] is a [`HashMap`] storing `()` values, and shares its collision resolution and
/// progress guarantees: keys live in a wait-free sparse [`Bucket`](crate::Bucket), collisions
/// resolve by linear probing over a grow-only probe window, and no operation blocks another
/// thread.
///
/// # Examples
///
/// ```
/// use scb::HashSet;
///
/// let set: HashSet<u64> = HashSet::new();
///
/// assert!(set.insert(1).is_ok());
/// assert_eq!(set.insert(1), Err(1));
/// assert!(set.contains(&1));
/// assert_eq!(set.remove(&1), Some(1));
/// assert!(set.is_empty());
/// ```
pub struct HashSet<K, H = RandomState>
where
    K: 'static,
    H: BuildHasher,
{
    map: HashMap<K, (), H>,
}

impl<K> HashSet<K, RandomState>
where
    K: 'static,
{
    /// Creates an empty [`HashSet`] with the default hasher.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::new();
    /// assert_eq!(set.len(), 0);
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, H> HashSet<K, H>
where
    K: 'static,
    H: BuildHasher,
{
    /// Creates an empty [`HashSet`] with the given [`BuildHasher`].
    #[inline]
    pub fn with_hasher(build_hasher: H) -> Self {
        Self {
            map: HashMap::with_hasher(build_hasher),
        }
    }

    /// Returns a reference to the [`BuildHasher`].
    #[inline]
    pub fn hasher(&self) -> &H {
        self.map.hasher()
    }

    /// Returns the number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the [`HashSet`] is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, H> HashSet<K, H>
where
    K: 'static + Eq + Hash,
    H: BuildHasher,
{
    /// Inserts a key.
    ///
    /// # Errors
    ///
    /// Returns the key back if it is already present.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::new();
    ///
    /// assert!(set.insert(1).is_ok());
    /// assert_eq!(set.insert(1), Err(1));
    /// ```
    #[inline]
    pub fn insert(&self, key: K) -> Result<(), K> {
        self.map.insert(key, ()).map_err(|(key, ())| key)
    }

    /// Returns `true` if the [`HashSet`] contains `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::new();
    ///
    /// assert!(!set.contains(&1));
    /// assert!(set.insert(1).is_ok());
    /// assert!(set.contains(&1));
    /// ```
    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Equivalent<K> + Hash + ?Sized,
    {
        self.map.contains(key)
    }

    /// Removes `key`, returning it.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::new();
    ///
    /// assert_eq!(set.remove(&1), None);
    /// assert!(set.insert(1).is_ok());
    /// assert_eq!(set.remove(&1), Some(1));
    /// ```
    #[inline]
    pub fn remove<Q>(&self, key: &Q) -> Option<K>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        K: Clone,
    {
        self.map.remove(key).map(|(key, ())| key)
    }

    /// Removes `key` if it passes `pred`, returning it.
    #[inline]
    pub fn remove_if<Q, P>(&self, key: &Q, mut pred: P) -> Option<K>
    where
        Q: Equivalent<K> + Hash + ?Sized,
        P: FnMut(&K) -> bool,
        K: Clone,
    {
        self.map
            .remove_if(key, |k, ()| pred(k))
            .map(|(key, ())| key)
    }

    /// Returns an iterator over the keys.
    ///
    /// The iterator is weakly consistent: keys inserted or removed concurrently may or may
    /// not be observed.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::{Guard, HashSet};
    ///
    /// let set: HashSet<u64> = HashSet::new();
    ///
    /// assert!(set.insert(1).is_ok());
    /// assert!(set.insert(2).is_ok());
    ///
    /// let guard = Guard::new();
    /// assert_eq!(set.iter(&guard).count(), 2);
    /// ```
    #[inline]
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, K> {
        Iter {
            entries: self.map.iter(guard),
        }
    }

    /// Calls `f` on every key.
    #[inline]
    pub fn for_each<F: FnMut(&K)>(&self, mut f: F) {
        self.map.for_each(|k, ()| f(k));
    }

    /// Retains the keys passing `pred`.
    #[inline]
    pub fn retain<F: FnMut(&K) -> bool>(&self, mut pred: F) {
        self.map.retain(|k, ()| pred(k));
    }

    /// Removes every key.
    ///
    /// # Examples
    ///
    /// ```
    /// use scb::HashSet;
    ///
    /// let set: HashSet<u64> = HashSet::new();
    ///
    /// assert!(set.insert(1).is_ok());
    /// set.clear();
    /// assert!(set.is_empty());
    /// ```
    #[inline]
    pub fn clear(&self) {
        self.map.clear();
    }
}

impl<K, H> Default for HashSet<K, H>
where
    K: 'static,
    H: BuildHasher + Default,
{
    #[inline]
    fn default() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K, H> Debug for HashSet<K, H>
where
    K: 'static + Debug + Eq + Hash,
    H: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.debug_set().entries(self.iter(&guard)).finish()
    }
}

impl<K, H> PartialEq for HashSet<K, H>
where
    K: 'static + Eq + Hash,
    H: BuildHasher,
{
    /// Returns `true` if the two sets hold an identical set of keys.
    ///
    /// The comparison is only meaningful in the absence of concurrent writers.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

/// An iterator over the keys of a [`HashSet`].
pub struct Iter<'g, K: 'static> {
    entries: hash_map::Iter<'g, K, ()>,
}

impl<'g, K: 'static> Iterator for Iter<'g, K> {
    type Item = &'g K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next().map(|(k, ())| k)
    }
}

impl<K: 'static> std::iter::FusedIterator for Iter<'_, K> {}

impl<K: 'static> Debug for Iter<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().finish()
    }
}
