//! Wait-free sparse bucket arrays and lock-free hash containers.
//!
//! # scb::Bucket
//! [`Bucket`] is an unbounded, integer-indexed concurrent sparse array backed by a 32-way
//! radix tree; element operations are wait-free.
//!
//! # scb::FixedSizeBucket
//! [`FixedSizeBucket`] is the flat, capacity-bounded variant of [`Bucket`] for queues, caches,
//! and pools that never need to grow.
//!
//! # scb::HashMap
//! [`HashMap`] is a lock-free hash map that resolves collisions by linear probing over a
//! [`Bucket`] with a dynamically extended probe window.
//!
//! # scb::HashSet
//! [`HashSet`] is a lock-free hash set based on [`HashMap`].
//!
//! # scb::ArrayReservoir
//! [`ArrayReservoir`] is a size-classed pool of reusable fixed-capacity arrays that the bucket
//! structures borrow their backing storage from.
//!
//! Memory reclamation is provided by the [`sdd`] epoch-based reclaimer; no operation in this
//! crate acquires a lock or blocks on another thread.
//!
//! # Optional features
//!
//! * `serde`: [`serde`](https://crates.io/crates/serde) support for the containers, including
//!   the `(count, contents)` persisted layout of [`FixedSizeBucket`].
//! * `equivalent`: interoperability with the
//!   [`equivalent`](https://crates.io/crates/equivalent) crate.

pub mod bucket;
pub use bucket::{Bucket, BucketReservoir, UpdateOutcome};

mod equivalent;
pub use equivalent::Equivalent;

mod exit_guard;

pub mod fixed_size_bucket;
pub use fixed_size_bucket::FixedSizeBucket;

pub mod hash_map;
pub use hash_map::HashMap;

pub mod hash_set;
pub use hash_set::HashSet;

pub mod reservoir;
pub use reservoir::ArrayReservoir;

#[cfg(feature = "serde")]
mod serde;

#[cfg(test)]
mod tests;

/// [`Guard`] re-exported from [`sdd`] for guarded iteration over the containers.
pub use sdd::Guard;
