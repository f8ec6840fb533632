use super::{FixedSizeBucket, HashMap, HashSet};

use serde::de::{self, Deserialize, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, SerializeTuple, Serializer};
use serde::Deserializer;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

use sdd::Guard;

pub struct HashMapVisitor<K: 'static + Eq + Hash, V: 'static, S: BuildHasher> {
    #[allow(clippy::type_complexity)]
    marker: PhantomData<fn() -> HashMap<K, V, S>>,
}

impl<K, V, S> HashMapVisitor<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn new() -> Self {
        HashMapVisitor {
            marker: PhantomData,
        }
    }
}

impl<'de, K, V, S> Visitor<'de> for HashMapVisitor<K, V, S>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
    S: BuildHasher + Default,
{
    type Value = HashMap<K, V, S>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a HashMap")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let map = HashMap::with_hasher(S::default());
        while let Some((key, value)) = access.next_entry()? {
            let _ = map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, K, V, S> Deserialize<'de> for HashMap<K, V, S>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
    S: BuildHasher + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(HashMapVisitor::<K, V, S>::new())
    }
}

impl<K, V, H> Serialize for HashMap<K, V, H>
where
    K: Serialize + Eq + Hash,
    V: Serialize,
    H: BuildHasher,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        let mut error = None;
        self.for_each(|k, v| {
            if error.is_none() {
                if let Err(e) = map.serialize_entry(k, v) {
                    error.replace(e);
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        map.end()
    }
}

pub struct HashSetVisitor<K: 'static + Eq + Hash, S: BuildHasher> {
    marker: PhantomData<fn() -> HashSet<K, S>>,
}

impl<K, S> HashSetVisitor<K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn new() -> Self {
        HashSetVisitor {
            marker: PhantomData,
        }
    }
}

impl<'de, K, S> Visitor<'de> for HashSetVisitor<K, S>
where
    K: Deserialize<'de> + Eq + Hash,
    S: BuildHasher + Default,
{
    type Value = HashSet<K, S>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a HashSet")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let set = HashSet::with_hasher(S::default());
        while let Some(key) = access.next_element()? {
            let _ = set.insert(key);
        }
        Ok(set)
    }
}

impl<'de, K, S> Deserialize<'de> for HashSet<K, S>
where
    K: Deserialize<'de> + Eq + Hash,
    S: BuildHasher + Default,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(HashSetVisitor::<K, S>::new())
    }
}

impl<K, H> Serialize for HashSet<K, H>
where
    K: Serialize + Eq + Hash,
    H: BuildHasher,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        let mut error = None;
        self.for_each(|k| {
            if error.is_none() {
                if let Err(e) = seq.serialize_element(k) {
                    error.replace(e);
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        seq.end()
    }
}

pub struct FixedSizeBucketVisitor<T: 'static> {
    marker: PhantomData<fn() -> FixedSizeBucket<T>>,
}

impl<T> FixedSizeBucketVisitor<T> {
    fn new() -> Self {
        FixedSizeBucketVisitor {
            marker: PhantomData,
        }
    }
}

impl<'de, T> Visitor<'de> for FixedSizeBucketVisitor<T>
where
    T: Deserialize<'de>,
{
    type Value = FixedSizeBucket<T>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a FixedSizeBucket as a count followed by its slots")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let count: usize = access
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let slots: Vec<Option<T>> = access
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let bucket = FixedSizeBucket::new(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            if let Some(value) = slot {
                bucket.set(index, value);
            }
        }
        if bucket.len() != count {
            return Err(de::Error::custom("slot count mismatch"));
        }
        Ok(bucket)
    }
}

impl<'de, T> Deserialize<'de> for FixedSizeBucket<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_tuple(2, FixedSizeBucketVisitor::<T>::new())
    }
}

/// The slots of a [`FixedSizeBucket`] in index order, empty slots as `None`, so the persisted
/// form preserves the sparse layout.
struct Slots<'a, T: 'static>(&'a FixedSizeBucket<T>);

impl<T> Serialize for Slots<'_, T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let guard = Guard::new();
        let mut seq = serializer.serialize_seq(Some(self.0.capacity()))?;
        let mut entries = self.0.iter(&guard).peekable();
        for index in 0..self.0.capacity() {
            match entries.peek() {
                Some((occupied, value)) if *occupied == index => {
                    seq.serialize_element(&Some(value))?;
                    entries.next();
                }
                _ => seq.serialize_element(&None::<&T>)?,
            }
        }
        seq.end()
    }
}

impl<T> Serialize for FixedSizeBucket<T>
where
    T: Serialize,
{
    /// Serializes the element count followed by every slot in index order.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.len())?;
        tuple.serialize_element(&Slots(self))?;
        tuple.end()
    }
}
