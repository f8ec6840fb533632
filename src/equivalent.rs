//! Vendor the [`equivalent`](https://crates.io/crates/equivalent) crate in order to avoid any
//! conflicts.

#[cfg(feature = "equivalent")]
pub use equivalent::Equivalent;

#[cfg(not(feature = "equivalent"))]
use std::borrow::Borrow;

/// Key equivalence trait.
///
/// This trait allows [`HashMap`](crate::HashMap) and [`HashSet`](crate::HashSet) lookup
/// operations to accept any borrowed form of the key type.
#[cfg(not(feature = "equivalent"))]
pub trait Equivalent<K: ?Sized> {
    /// Compares `self` to `key` and returns `true` if they are equal.
    fn equivalent(&self, key: &K) -> bool;
}

#[cfg(not(feature = "equivalent"))]
impl<Q: ?Sized, K: ?Sized> Equivalent<K> for Q
where
    Q: Eq,
    K: Borrow<Q>,
{
    #[inline]
    fn equivalent(&self, key: &K) -> bool {
        PartialEq::eq(self, key.borrow())
    }
}
