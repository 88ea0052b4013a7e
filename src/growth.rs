//! Growth: when to resize, and incremental evacuation of the old array.
//!
//! Starting a grow moves no data. It allocates the new array, parks the
//! current one as the old array and resets the evacuation cursor. After that
//! every insert or delete evacuates the old bucket it is about to touch plus
//! the bucket under the cursor, so the resize finishes after at most one
//! mutating call per old bucket regardless of the access pattern.
//!
//! Evacuation rewrites each old slot's tag to `EvacuatedLow`,
//! `EvacuatedHigh` or `EvacuatedEmpty`; those tags are the only progress
//! record the lookup and iteration paths need.

use crate::bucket::{tophash, BucketArray, BucketRef, Entry, Tag, BUCKET_CNT};
use crate::descriptor::TypeDescriptor;
use crate::error::Error;
use crate::raw::{alloc_array, bad_state, rehash, RawTable};

/// Maximum average load per bucket is `LOAD_FACTOR_NUM / LOAD_FACTOR_DEN`.
pub(crate) const LOAD_FACTOR_NUM: usize = 13;
pub(crate) const LOAD_FACTOR_DEN: usize = 2;

/// How far one call may scan ahead for already-evacuated buckets.
const MAX_CURSOR_SCAN: usize = 1024;

/// An in-flight resize.
#[derive(Debug)]
pub(crate) struct Evacuation<K, V> {
    pub(crate) array: BucketArray<K, V>,
    /// Same bucket count as the new array: the grow only compacts chains.
    pub(crate) same_size: bool,
    /// Every old bucket below this index has been evacuated.
    pub(crate) cursor: usize,
}

#[inline]
pub(crate) fn bucket_shift(b: u8) -> usize {
    1usize << b
}

#[inline]
pub(crate) fn bucket_mask(b: u8) -> usize {
    bucket_shift(b) - 1
}

/// Whether `count` entries overload `2^b` buckets.
#[inline]
pub(crate) fn over_load_factor(count: usize, b: u8) -> bool {
    count > BUCKET_CNT
        && count > LOAD_FACTOR_NUM.saturating_mul(bucket_shift(b) / LOAD_FACTOR_DEN)
}

/// Roughly as many overflow buckets as primary buckets. Most of them must be
/// sparsely used, otherwise the load factor would have triggered first.
#[inline]
pub(crate) fn too_many_overflow_buckets(noverflow: u16, b: u8) -> bool {
    noverflow >= 1u16 << b.min(15)
}

/// Count one more overflow bucket. Exact below `2^16` buckets; above that,
/// counted with probability `1 / 2^(b-15)` so the `u16` keeps tracking
/// "about as many as primary buckets".
fn incr_noverflow(noverflow: &mut u16, b: u8) {
    if b < 16 {
        *noverflow = noverflow.saturating_add(1);
        return;
    }
    let mask = 1u32
        .checked_shl(u32::from(b - 15))
        .map_or(u32::MAX, |bit| bit - 1);
    if rand::random::<u32>() & mask == 0 {
        *noverflow = noverflow.saturating_add(1);
    }
}

/// Next free slot in one evacuation destination chain.
struct EvacDst {
    bucket: BucketRef,
    index: usize,
}

impl EvacDst {
    fn new(primary: usize) -> Self {
        Self {
            bucket: BucketRef::Primary(primary),
            index: 0,
        }
    }

    /// Append an entry; returns true if an overflow bucket had to be linked.
    fn place<K, V>(&mut self, array: &mut BucketArray<K, V>, top: u8, entry: Entry<K, V>) -> bool {
        let linked = self.index == BUCKET_CNT;
        if linked {
            self.bucket = array.push_overflow(self.bucket);
            self.index = 0;
        }
        let b = array.get_mut(self.bucket);
        b.tags[self.index] = Tag::Full(top);
        b.entries[self.index] = Some(entry);
        self.index += 1;
        linked
    }
}

impl<K, V, D> RawTable<K, V, D>
where
    D: TypeDescriptor<K>,
{
    /// Start a resize: doubling if the next insert would overload the
    /// table, same-size otherwise.
    pub(crate) fn hash_grow(&mut self) -> Result<(), Error> {
        let bigger = over_load_factor(self.count + 1, self.b);
        let new_b = if bigger { self.b + 1 } else { self.b };
        // Allocate before touching anything so failure leaves the table as is.
        let fresh = alloc_array(new_b)?;
        let old = std::mem::replace(&mut self.buckets, fresh);
        tracing::debug!(
            old_b = self.b,
            b = new_b,
            count = self.count,
            noverflow = self.noverflow,
            same_size = !bigger,
            "starting table grow"
        );
        self.b = new_b;
        self.noverflow = 0;
        self.old = Some(Evacuation {
            array: old,
            same_size: !bigger,
            cursor: 0,
        });
        Ok(())
    }

    /// Link an overflow bucket after `tail` in the current array.
    pub(crate) fn new_overflow(&mut self, tail: BucketRef) -> BucketRef {
        let r = self.buckets.push_overflow(tail);
        incr_noverflow(&mut self.noverflow, self.b);
        tracing::trace!(
            noverflow = self.noverflow,
            overflow_buckets = self.buckets.overflow_len(),
            "overflow bucket linked"
        );
        r
    }

    /// Evacuate the old bucket behind current bucket `bucket`, then one
    /// more at the cursor to guarantee progress.
    pub(crate) fn grow_work(&mut self, bucket: usize) {
        let Some(ev) = &self.old else {
            return;
        };
        let oldbucket = bucket & (ev.array.len() - 1);
        self.evacuate(oldbucket);
        if let Some(ev) = &self.old {
            let cursor = ev.cursor;
            self.evacuate(cursor);
        }
    }

    /// Run the in-flight resize to completion.
    pub(crate) fn finish_growth(&mut self) {
        while let Some(ev) = &self.old {
            let cursor = ev.cursor;
            self.evacuate(cursor);
        }
    }

    fn evacuate(&mut self, oldbucket: usize) {
        let Some(ev) = self.old.as_mut() else {
            return;
        };
        let newbit = ev.array.len();
        if !ev.array.is_evacuated(oldbucket) {
            let reflexive = self.descriptor.flags().reflexive_key;
            // Low and high destinations; high is unused by a same-size grow.
            let mut dst = [EvacDst::new(oldbucket), EvacDst::new(oldbucket + newbit)];
            let mut src = Some(BucketRef::Primary(oldbucket));
            while let Some(r) = src {
                src = ev.array.next(r);
                let b = ev.array.get_mut(r);
                for i in 0..BUCKET_CNT {
                    let top = match b.tags[i] {
                        Tag::Full(top) => top,
                        tag if tag.is_empty() => {
                            b.tags[i] = Tag::EvacuatedEmpty;
                            continue;
                        }
                        _ => bad_state(),
                    };
                    let Some(entry) = b.entries[i].take() else {
                        bad_state()
                    };
                    let (high, top) = if ev.same_size {
                        (false, top)
                    } else {
                        let hash = rehash(&self.descriptor, &entry.key, self.seed);
                        if !reflexive && !self.descriptor.equal(&entry.key, &entry.key) {
                            // NaN-like key: its hash is not reproducible, so the
                            // stored tag picks the half (iterators rely on the
                            // same rule) and a fresh tag spreads it next time.
                            (top & 1 == 1, tophash(hash))
                        } else {
                            (hash as usize & newbit != 0, top)
                        }
                    };
                    b.tags[i] = if high {
                        Tag::EvacuatedHigh
                    } else {
                        Tag::EvacuatedLow
                    };
                    if dst[usize::from(high)].place(&mut self.buckets, top, entry) {
                        incr_noverflow(&mut self.noverflow, self.b);
                    }
                }
            }
        }
        if oldbucket == ev.cursor {
            self.advance_evacuation_mark(newbit);
        }
    }

    fn advance_evacuation_mark(&mut self, newbit: usize) {
        let Some(ev) = self.old.as_mut() else {
            return;
        };
        ev.cursor += 1;
        let stop = (ev.cursor + MAX_CURSOR_SCAN).min(newbit);
        while ev.cursor != stop && ev.array.is_evacuated(ev.cursor) {
            ev.cursor += 1;
        }
        if ev.cursor == newbit {
            tracing::debug!(
                b = self.b,
                count = self.count,
                same_size = ev.same_size,
                "table grow complete"
            );
            // Drops the old array together with its overflow buckets.
            self.old = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::StdKeys;
    use crate::raw::Slot;

    #[test]
    fn load_factor_thresholds() {
        // One bucket holds a full bucket's worth before growing.
        assert!(!over_load_factor(8, 0));
        assert!(over_load_factor(9, 0));
        // 6.5 per bucket from then on.
        assert!(!over_load_factor(13, 1));
        assert!(over_load_factor(14, 1));
        assert!(!over_load_factor(52, 3));
        assert!(over_load_factor(53, 3));
    }

    #[test]
    fn overflow_threshold_caps_at_2_pow_15() {
        assert!(!too_many_overflow_buckets(0, 0));
        assert!(too_many_overflow_buckets(1, 0));
        assert!(!too_many_overflow_buckets(7, 3));
        assert!(too_many_overflow_buckets(8, 3));
        assert!(too_many_overflow_buckets(1 << 15, 40));
        assert!(!too_many_overflow_buckets((1 << 15) - 1, 40));
    }

    #[test]
    fn noverflow_is_exact_for_small_tables() {
        let mut n = 0u16;
        for _ in 0..10 {
            incr_noverflow(&mut n, 15);
        }
        assert_eq!(n, 10);
    }

    fn put(t: &mut RawTable<u64, u64, StdKeys>, k: u64) {
        let hash = t.hash(&k).unwrap();
        if let Slot::Vacant(slot) = t.assign(k, hash).unwrap() {
            t.fill(slot, k);
        }
    }

    #[test]
    fn grow_moves_nothing_until_touched() {
        let mut t: RawTable<u64, u64, StdKeys> =
            RawTable::try_with_capacity(100, StdKeys::default()).unwrap();
        let b = t.b;
        for k in 0..1000 {
            put(&mut t, k);
            if t.old.is_some() {
                break;
            }
        }
        let ev = t.old.as_ref().expect("a grow started");
        assert_eq!(t.b, b + 1);
        assert!(!ev.same_size);
        // The triggering insert evacuated at most two old buckets.
        let evacuated = (0..ev.array.len()).filter(|&i| ev.array.is_evacuated(i)).count();
        assert!(evacuated <= 2, "evacuated {evacuated}");
        assert!(ev.cursor >= 1);
    }

    #[test]
    fn finish_growth_releases_old_array() {
        let mut t: RawTable<u64, u64, StdKeys> = RawTable::new(StdKeys::default());
        for k in 0..200 {
            put(&mut t, k);
        }
        t.finish_growth();
        assert!(t.old.is_none());
        for k in 0..200 {
            let hash = t.hash(&k).unwrap();
            assert!(t.find(&k, hash).is_some());
        }
        assert_eq!(t.count, 200);
    }

    #[test]
    fn failed_allocation_leaves_table_untouched() {
        let mut t: RawTable<u64, u64, StdKeys> = RawTable::new(StdKeys::default());
        put(&mut t, 1);
        // No allocator can hand out 2^62 buckets.
        t.b = 62;
        t.count = usize::MAX / 2;
        let before = t.buckets.len();
        assert!(matches!(t.hash_grow(), Err(Error::Alloc { .. })));
        assert!(t.old.is_none());
        assert_eq!(t.b, 62);
        assert_eq!(t.buckets.len(), before);
    }
}
