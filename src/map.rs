//! BucketMap: the public table, wrapping `RawTable` with the write flag.

use crate::descriptor::{StdKeys, TypeDescriptor};
use crate::error::Error;
use crate::growth::bucket_shift;
use crate::iter::{start_position, Cursor, Iter, IterMut, Keys, Values};
use crate::raw::{RawTable, Slot, SlotPos};
use crate::write_flag::WriteFlag;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An incrementally resizing hash map.
///
/// Entries live in 8-slot buckets chained through overflow buckets. When the
/// table fills up it doubles (or, when chains get long but sparse, rebuilds
/// at the same size) one bucket at a time: each insert or remove moves at
/// most two old buckets, so no single call pays for the whole resize.
///
/// `D` decides how keys are hashed and compared; see [`TypeDescriptor`].
pub struct BucketMap<K, V, D = StdKeys> {
    raw: RawTable<K, V, D>,
    writing: WriteFlag,
    id: u64,
}

/// A point-in-time view of a table's internal shape.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct TableStats {
    pub len: usize,
    /// log2 of the bucket count.
    pub bucket_exponent: u8,
    pub buckets: usize,
    /// A resize is in flight.
    pub growing: bool,
    /// The in-flight resize keeps the bucket count.
    pub same_size_grow: bool,
    /// Old buckets below this index have been evacuated.
    pub evacuated: usize,
    /// Buckets in the old array, 0 when not growing.
    pub old_buckets: usize,
    /// The overflow counter used for the same-size grow decision.
    pub overflow_estimate: u16,
    /// Overflow buckets actually linked in the current array.
    pub overflow_buckets: usize,
}

impl<K, V> BucketMap<K, V>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self::with_descriptor(StdKeys::default())
    }

    /// Panics if the bucket array for `capacity` entries cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_descriptor(capacity, StdKeys::default())
    }
}

impl<K, V> Default for BucketMap<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> BucketMap<K, V, StdKeys<S>>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_descriptor(StdKeys::with_hasher(hasher))
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self::with_capacity_and_descriptor(capacity, StdKeys::with_hasher(hasher))
    }
}

impl<K, V, D> BucketMap<K, V, D>
where
    D: TypeDescriptor<K>,
{
    fn from_raw(raw: RawTable<K, V, D>) -> Self {
        Self {
            raw,
            writing: WriteFlag::new(),
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// An empty table; no bucket is allocated until the first insert.
    pub fn with_descriptor(descriptor: D) -> Self {
        Self::from_raw(RawTable::new(descriptor))
    }

    pub fn with_capacity_and_descriptor(capacity: usize, descriptor: D) -> Self {
        Self::try_with_capacity_and_descriptor(capacity, descriptor)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Sizes the table so `capacity` inserts do not trigger a doubling.
    pub fn try_with_capacity_and_descriptor(capacity: usize, descriptor: D) -> Result<Self, Error> {
        Ok(Self::from_raw(RawTable::try_with_capacity(capacity, descriptor)?))
    }

    pub fn descriptor(&self) -> &D {
        &self.raw.descriptor
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.count == 0
    }

    pub fn stats(&self) -> TableStats {
        let old = self.raw.old.as_ref();
        TableStats {
            len: self.raw.count,
            bucket_exponent: self.raw.b,
            buckets: bucket_shift(self.raw.b),
            growing: old.is_some(),
            same_size_grow: old.is_some_and(|ev| ev.same_size),
            evacuated: old.map_or(0, |ev| ev.cursor),
            old_buckets: old.map_or(0, |ev| ev.array.len()),
            overflow_estimate: self.raw.noverflow,
            overflow_buckets: self.raw.buckets.overflow_len(),
        }
    }

    pub(crate) fn raw(&self) -> &RawTable<K, V, D> {
        &self.raw
    }

    pub(crate) fn writing(&self) -> &WriteFlag {
        &self.writing
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn lookup(&self, key: &K) -> Result<Option<SlotPos>, Error> {
        if self.raw.count == 0 {
            self.raw.probe_empty(key)?;
            return Ok(None);
        }
        self.writing.check("concurrent map read and map write");
        let hash = self.raw.hash(key)?;
        Ok(self.raw.find(key, hash))
    }

    pub fn try_get(&self, key: &K) -> Result<Option<&V>, Error> {
        Ok(self.lookup(key)?.map(|pos| &self.raw.entry(pos).value))
    }

    /// Panics if the descriptor cannot hash `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.try_get(key).unwrap_or_else(|e| panic!("{e}"))
    }

    /// The stored key is returned as well; it may differ from `key` when the
    /// descriptor's equality is looser than identity.
    pub fn try_get_key_value(&self, key: &K) -> Result<Option<(&K, &V)>, Error> {
        Ok(self.lookup(key)?.map(|pos| {
            let e = self.raw.entry(pos);
            (&e.key, &e.value)
        }))
    }

    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        self.try_get_key_value(key).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let pos = self.lookup(key).unwrap_or_else(|e| panic!("{e}"))?;
        Some(&mut self.raw.entry_mut(pos).value)
    }

    pub fn try_contains_key(&self, key: &K) -> Result<bool, Error> {
        Ok(self.lookup(key)?.is_some())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.try_contains_key(key).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Insert or overwrite; returns the previous value.
    ///
    /// On `Err` the table is unchanged: hashing happens before anything is
    /// touched and a new bucket array is allocated before the swap.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, Error> {
        let hash = self.raw.hash(&key)?;
        let _g = self.writing.enter();
        match self.raw.assign(key, hash)? {
            Slot::Occupied(pos, key) => {
                let update = self.raw.descriptor.flags().needs_key_update;
                let e = self.raw.entry_mut(pos);
                if update {
                    e.key = key;
                }
                Ok(Some(core::mem::replace(&mut e.value, value)))
            }
            Slot::Vacant(slot) => {
                self.raw.fill(slot, value);
                Ok(None)
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.try_insert(key, value).unwrap_or_else(|e| panic!("{e}"))
    }

    /// The value for `key`, inserting `default()` first if absent.
    pub fn try_get_or_insert_with<F>(&mut self, key: K, default: F) -> Result<&mut V, Error>
    where
        F: FnOnce() -> V,
    {
        let hash = self.raw.hash(&key)?;
        let _g = self.writing.enter();
        match self.raw.assign(key, hash)? {
            Slot::Occupied(pos, key) => {
                let update = self.raw.descriptor.flags().needs_key_update;
                let e = self.raw.entry_mut(pos);
                if update {
                    e.key = key;
                }
                Ok(&mut e.value)
            }
            Slot::Vacant(slot) => Ok(&mut self.raw.fill(slot, default()).value),
        }
    }

    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        self.try_get_or_insert_with(key, default)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_remove_entry(&mut self, key: &K) -> Result<Option<(K, V)>, Error> {
        if self.raw.count == 0 {
            self.raw.probe_empty(key)?;
            return Ok(None);
        }
        let hash = self.raw.hash(key)?;
        let _g = self.writing.enter();
        Ok(self.raw.delete(key, hash))
    }

    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        self.try_remove_entry(key).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_remove(&mut self, key: &K) -> Result<Option<V>, Error> {
        Ok(self.try_remove_entry(key)?.map(|(_, v)| v))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.try_remove(key).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Remove every entry. The bucket array is kept at its current size.
    pub fn clear(&mut self) {
        let _g = self.writing.enter();
        self.raw.clear();
    }

    /// Keep only the entries for which `f` returns true. Completes any
    /// in-flight resize first.
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let _g = self.writing.enter();
        self.raw.retain(f);
    }

    /// Iterate in an unspecified order that differs from call to call.
    pub fn iter(&self) -> Iter<'_, K, V, D> {
        Iter::new(&self.raw, &self.writing)
    }

    /// Completes any in-flight resize, then iterates with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        {
            let _g = self.writing.enter();
            self.raw.finish_growth();
        }
        let (start, _) = start_position(self.raw.b);
        IterMut::new(self.raw.buckets.buckets_mut(start), self.raw.count)
    }

    pub fn keys(&self) -> Keys<'_, K, V, D> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V, D> {
        Values { inner: self.iter() }
    }

    /// A detached traversal: the table may be mutated between steps.
    pub fn cursor(&self) -> Cursor<K, V> {
        Cursor::new(self)
    }
}

impl<'a, K, V, D> IntoIterator for &'a BucketMap<K, V, D>
where
    D: TypeDescriptor<K>,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, D> Extend<(K, V)> for BucketMap<K, V, D>
where
    D: TypeDescriptor<K>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for BucketMap<K, V>
where
    K: Hash + Eq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity(iter.size_hint().0);
        map.extend(iter);
        map
    }
}

impl<K, V, D> fmt::Debug for BucketMap<K, V, D>
where
    K: fmt::Debug,
    V: fmt::Debug,
    D: TypeDescriptor<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
