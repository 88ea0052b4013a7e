//! RawTable: the bucket engine behind `BucketMap`.
//!
//! Lookups, inserts and deletes over the current bucket array, falling back
//! to the old array for buckets that a resize has not reached yet. Growth
//! and evacuation live in `growth.rs`. Nothing here checks the write flag;
//! `BucketMap` guards every entry point.

use crate::bucket::{tophash, BucketArray, BucketRef, Entry, Tag, BUCKET_CNT};
use crate::descriptor::TypeDescriptor;
use crate::error::{Error, HashError};
use crate::growth::{bucket_mask, over_load_factor, too_many_overflow_buckets, Evacuation};

pub(crate) struct RawTable<K, V, D> {
    /// Live entries, across both arrays while growing.
    pub(crate) count: usize,
    /// log2 of the current bucket count.
    pub(crate) b: u8,
    /// Approximate number of overflow buckets in the current array.
    pub(crate) noverflow: u16,
    pub(crate) seed: u64,
    pub(crate) buckets: BucketArray<K, V>,
    /// Present exactly while a resize is in flight.
    pub(crate) old: Option<Evacuation<K, V>>,
    pub(crate) descriptor: D,
}

/// Location of a live slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct SlotPos {
    pub(crate) old: bool,
    pub(crate) bucket: BucketRef,
    pub(crate) index: usize,
}

/// A free slot claimed by `assign`, filled by `fill`.
pub(crate) struct Vacant<K> {
    bucket: BucketRef,
    index: usize,
    top: u8,
    key: K,
}

pub(crate) enum Slot<K> {
    /// The key is already present; the rejected key is handed back.
    Occupied(SlotPos, K),
    Vacant(Vacant<K>),
}

#[cold]
#[inline(never)]
pub(crate) fn bad_state() -> ! {
    panic!("bad map state")
}

pub(crate) fn fresh_seed() -> u64 {
    rand::random()
}

/// Hash a key that is already stored; it hashed fine once, so a failure now
/// means the descriptor is broken.
pub(crate) fn rehash<K, D: TypeDescriptor<K>>(descriptor: &D, key: &K, seed: u64) -> u64 {
    match descriptor.hash(key, seed) {
        Ok(h) => h,
        Err(e) => panic!("stored key no longer hashes: {e}"),
    }
}

pub(crate) fn alloc_array<K, V>(b: u8) -> Result<BucketArray<K, V>, Error> {
    BucketArray::try_new(b).map_err(|source| Error::Alloc {
        buckets: 1usize << b,
        source,
    })
}

impl<K, V, D> RawTable<K, V, D>
where
    D: TypeDescriptor<K>,
{
    /// Size the table for `hint` entries. Storage for a single bucket is
    /// deferred to the first insert.
    pub(crate) fn try_with_capacity(hint: usize, descriptor: D) -> Result<Self, Error> {
        let mut b = 0u8;
        while over_load_factor(hint, b) {
            b += 1;
        }
        let buckets = if b == 0 {
            BucketArray::unallocated()
        } else {
            alloc_array(b)?
        };
        Ok(Self {
            count: 0,
            b,
            noverflow: 0,
            seed: fresh_seed(),
            buckets,
            old: None,
            descriptor,
        })
    }

    pub(crate) fn new(descriptor: D) -> Self {
        Self {
            count: 0,
            b: 0,
            noverflow: 0,
            seed: fresh_seed(),
            buckets: BucketArray::unallocated(),
            old: None,
            descriptor,
        }
    }

    #[inline]
    pub(crate) fn hash(&self, key: &K) -> Result<u64, HashError> {
        self.descriptor.hash(key, self.seed)
    }

    /// On an empty table nothing is hashed, except that a descriptor which
    /// may fail still sees the key once so a bad key is reported.
    pub(crate) fn probe_empty(&self, key: &K) -> Result<(), HashError> {
        if self.descriptor.flags().hash_may_fail {
            self.descriptor.hash(key, 0)?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn array(&self, old: bool) -> &BucketArray<K, V> {
        match (old, &self.old) {
            (true, Some(ev)) => &ev.array,
            (true, None) => bad_state(),
            (false, _) => &self.buckets,
        }
    }

    /// Where the entries of current bucket `bucket` live right now: the old
    /// chain they still sit in, or the bucket itself.
    #[inline]
    pub(crate) fn source(&self, bucket: usize) -> (bool, usize) {
        if let Some(ev) = &self.old {
            let oldbucket = bucket & (ev.array.len() - 1);
            if !ev.array.is_evacuated(oldbucket) {
                return (true, oldbucket);
            }
        }
        (false, bucket)
    }

    /// Whether an entry found in an unevacuated old bucket will land in
    /// current bucket `bucket`. Must agree with `evacuate`.
    pub(crate) fn destined_for(&self, key: &K, top: u8, bucket: usize) -> bool {
        let Some(ev) = &self.old else {
            return true;
        };
        if ev.same_size {
            return true;
        }
        if self.descriptor.flags().reflexive_key || self.descriptor.equal(key, key) {
            let hash = rehash(&self.descriptor, key, self.seed);
            (hash as usize & bucket_mask(self.b)) == bucket
        } else {
            // k != k: the hash is not reproducible, the stored tag decides.
            let high = bucket & ev.array.len() != 0;
            high == (top & 1 == 1)
        }
    }

    pub(crate) fn find(&self, key: &K, hash: u64) -> Option<SlotPos> {
        if self.count == 0 {
            return None;
        }
        let mut old = false;
        let mut idx = hash as usize & bucket_mask(self.b);
        let (o, primary) = self.source(idx);
        if o {
            old = true;
            idx = primary;
        }
        let array = self.array(old);
        let top = tophash(hash);
        let mut cur = Some(BucketRef::Primary(idx));
        while let Some(r) = cur {
            let b = array.get(r);
            for i in 0..BUCKET_CNT {
                match b.tags[i] {
                    Tag::EmptyRest => return None,
                    Tag::Full(t) if t == top => {
                        if let Some(e) = &b.entries[i] {
                            if self.descriptor.equal(key, &e.key) {
                                return Some(SlotPos {
                                    old,
                                    bucket: r,
                                    index: i,
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            cur = array.next(r);
        }
        None
    }

    pub(crate) fn entry(&self, pos: SlotPos) -> &Entry<K, V> {
        match &self.array(pos.old).get(pos.bucket).entries[pos.index] {
            Some(e) => e,
            None => bad_state(),
        }
    }

    pub(crate) fn entry_mut(&mut self, pos: SlotPos) -> &mut Entry<K, V> {
        let array = match (pos.old, &mut self.old) {
            (true, Some(ev)) => &mut ev.array,
            (true, None) => bad_state(),
            (false, _) => &mut self.buckets,
        };
        match &mut array.get_mut(pos.bucket).entries[pos.index] {
            Some(e) => e,
            None => bad_state(),
        }
    }

    /// Look up a key taken from the table itself (iterator resolution).
    pub(crate) fn get_stored(&self, key: &K) -> Option<&Entry<K, V>> {
        if self.count == 0 {
            return None;
        }
        let hash = rehash(&self.descriptor, key, self.seed);
        self.find(key, hash).map(|pos| self.entry(pos))
    }

    /// Find `key` for writing, or claim a free slot for it.
    ///
    /// Allocates the first bucket lazily, performs grow work on the target
    /// bucket, and starts a grow (then retries) when the table is too full.
    pub(crate) fn assign(&mut self, key: K, hash: u64) -> Result<Slot<K>, Error> {
        if !self.buckets.is_allocated() {
            self.buckets = alloc_array(self.b)?;
        }
        let top = tophash(hash);
        loop {
            let idx = hash as usize & bucket_mask(self.b);
            if self.old.is_some() {
                self.grow_work(idx);
            }

            let array = &self.buckets;
            let mut vacant: Option<(BucketRef, usize)> = None;
            let mut r = BucketRef::Primary(idx);
            'chain: loop {
                let b = array.get(r);
                for i in 0..BUCKET_CNT {
                    match b.tags[i] {
                        Tag::Full(t) if t == top => {
                            if let Some(e) = &b.entries[i] {
                                if self.descriptor.equal(&key, &e.key) {
                                    let pos = SlotPos {
                                        old: false,
                                        bucket: r,
                                        index: i,
                                    };
                                    return Ok(Slot::Occupied(pos, key));
                                }
                            }
                        }
                        tag if tag.is_empty() => {
                            if vacant.is_none() {
                                vacant = Some((r, i));
                            }
                            if tag == Tag::EmptyRest {
                                break 'chain;
                            }
                        }
                        _ => {}
                    }
                }
                match array.next(r) {
                    Some(n) => r = n,
                    None => break,
                }
            }

            if self.old.is_none()
                && (over_load_factor(self.count + 1, self.b)
                    || too_many_overflow_buckets(self.noverflow, self.b))
            {
                self.hash_grow()?;
                // Growing invalidates everything found above.
                continue;
            }

            let (bucket, index) = match vacant {
                Some(v) => v,
                None => (self.new_overflow(r), 0),
            };
            return Ok(Slot::Vacant(Vacant {
                bucket,
                index,
                top,
                key,
            }));
        }
    }

    pub(crate) fn fill(&mut self, vacant: Vacant<K>, value: V) -> &mut Entry<K, V> {
        let Vacant {
            bucket,
            index,
            top,
            key,
        } = vacant;
        let b = self.buckets.get_mut(bucket);
        b.tags[index] = Tag::Full(top);
        self.count += 1;
        b.entries[index].insert(Entry { key, value })
    }

    pub(crate) fn delete(&mut self, key: &K, hash: u64) -> Option<(K, V)> {
        if self.count == 0 {
            return None;
        }
        let idx = hash as usize & bucket_mask(self.b);
        if self.old.is_some() {
            self.grow_work(idx);
        }
        let top = tophash(hash);

        let mut found = None;
        let mut cur = Some(BucketRef::Primary(idx));
        'search: while let Some(r) = cur {
            let b = self.buckets.get(r);
            for i in 0..BUCKET_CNT {
                match b.tags[i] {
                    Tag::EmptyRest => break 'search,
                    Tag::Full(t) if t == top => {
                        if let Some(e) = &b.entries[i] {
                            if self.descriptor.equal(key, &e.key) {
                                found = Some((r, i));
                                break 'search;
                            }
                        }
                    }
                    _ => {}
                }
            }
            cur = self.buckets.next(r);
        }

        let (r, i) = found?;
        let b = self.buckets.get_mut(r);
        let Some(entry) = b.entries[i].take() else {
            bad_state()
        };
        b.tags[i] = Tag::EmptyOne;
        self.mark_rest(idx, r, i);

        self.count -= 1;
        if self.count == 0 {
            // Fresh seed so colliding keys cannot be replayed against the reused table.
            self.seed = fresh_seed();
            tracing::trace!("table emptied, hash seed reset");
        }
        Some((entry.key, entry.value))
    }

    /// After emptying slot `i` of bucket `r`, turn the trailing run of
    /// `EmptyOne` slots ending there into `EmptyRest`, walking back across
    /// the chain rooted at primary bucket `primary`.
    fn mark_rest(&mut self, primary: usize, mut r: BucketRef, mut i: usize) {
        let array = &mut self.buckets;
        let rest_follows = if i == BUCKET_CNT - 1 {
            match array.next(r) {
                Some(n) => array.get(n).tags[0] == Tag::EmptyRest,
                None => true,
            }
        } else {
            array.get(r).tags[i + 1] == Tag::EmptyRest
        };
        if !rest_follows {
            return;
        }
        let origin = BucketRef::Primary(primary);
        loop {
            array.get_mut(r).tags[i] = Tag::EmptyRest;
            if i == 0 {
                if r == origin {
                    break;
                }
                let mut prev = origin;
                while let Some(n) = array.next(prev) {
                    if n == r {
                        break;
                    }
                    prev = n;
                }
                r = prev;
                i = BUCKET_CNT - 1;
            } else {
                i -= 1;
            }
            if array.get(r).tags[i] != Tag::EmptyOne {
                break;
            }
        }
    }

    /// Drop every entry, keeping the current allocation and bucket count.
    pub(crate) fn clear(&mut self) {
        if self.count == 0 {
            return;
        }
        self.old = None;
        self.noverflow = 0;
        self.count = 0;
        self.seed = fresh_seed();
        self.buckets.reset();
        tracing::trace!(b = self.b, "table cleared");
    }

    /// Keep only entries for which `f` returns true.
    pub(crate) fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        if self.count == 0 {
            return;
        }
        self.finish_growth();
        for idx in 0..self.buckets.len() {
            let chain = self.buckets.chain(idx);
            for &r in &chain {
                let b = self.buckets.get_mut(r);
                for i in 0..BUCKET_CNT {
                    let keep = match (b.tags[i], &mut b.entries[i]) {
                        (Tag::Full(_), Some(e)) => f(&e.key, &mut e.value),
                        _ => true,
                    };
                    if !keep {
                        b.entries[i] = None;
                        b.tags[i] = Tag::EmptyOne;
                        self.count -= 1;
                    }
                }
            }
            'tail: for &r in chain.iter().rev() {
                let b = self.buckets.get_mut(r);
                for i in (0..BUCKET_CNT).rev() {
                    if !b.tags[i].is_empty() {
                        break 'tail;
                    }
                    b.tags[i] = Tag::EmptyRest;
                }
            }
        }
        if self.count == 0 {
            self.seed = fresh_seed();
        }
    }
}
