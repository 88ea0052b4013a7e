//! Buckets, slot tags and bucket arrays.
//!
//! A bucket holds up to `BUCKET_CNT` entries. Each slot carries a [`Tag`]:
//! either the top byte of the entry's hash or a sentinel describing an empty
//! or evacuated slot. Entries that do not fit chain into overflow buckets.
//!
//! Overflow buckets live in a `SlotMap` arena owned by the bucket array, so a
//! chain is a singly linked list of arena keys hanging off a primary bucket.
//! Dropping (or resetting) the array releases every chain at once.

use core::iter::Chain;
use core::slice;
use slotmap::{new_key_type, SlotMap};
use std::collections::TryReserveError;

/// Slots per bucket.
pub(crate) const BUCKET_CNT: usize = 8;

/// Smallest top hash of a live slot; smaller values are sentinels.
pub(crate) const MIN_TOP_HASH: u8 = 5;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Tag {
    /// Empty, and every later slot of the chain is empty too.
    EmptyRest,
    /// Empty.
    EmptyOne,
    /// Entry moved to the low half of the grown array.
    EvacuatedLow,
    /// Entry moved to the high half of the grown array.
    EvacuatedHigh,
    /// Empty, and the bucket has been evacuated.
    EvacuatedEmpty,
    /// Live entry with this top hash (always `>= MIN_TOP_HASH`).
    Full(u8),
}

impl Tag {
    #[inline]
    pub(crate) fn is_empty(self) -> bool {
        matches!(self, Tag::EmptyRest | Tag::EmptyOne)
    }

    #[inline]
    pub(crate) fn is_evacuated(self) -> bool {
        matches!(
            self,
            Tag::EvacuatedLow | Tag::EvacuatedHigh | Tag::EvacuatedEmpty
        )
    }
}

/// Top byte of `hash`, shifted out of the sentinel range.
#[inline]
pub(crate) fn tophash(hash: u64) -> u8 {
    let top = (hash >> 56) as u8;
    if top < MIN_TOP_HASH {
        top + MIN_TOP_HASH
    } else {
        top
    }
}

#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

new_key_type! {
    pub(crate) struct OverflowId;
}

#[derive(Debug)]
pub(crate) struct Bucket<K, V> {
    pub(crate) tags: [Tag; BUCKET_CNT],
    pub(crate) entries: [Option<Entry<K, V>>; BUCKET_CNT],
    pub(crate) overflow: Option<OverflowId>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            tags: [Tag::EmptyRest; BUCKET_CNT],
            entries: std::array::from_fn(|_| None),
            overflow: None,
        }
    }

    /// Live entry at slot `i`, if any.
    #[inline]
    pub(crate) fn live(&self, i: usize) -> Option<(u8, &Entry<K, V>)> {
        match (self.tags[i], &self.entries[i]) {
            (Tag::Full(top), Some(e)) => Some((top, e)),
            _ => None,
        }
    }
}

/// Address of a bucket inside one array.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum BucketRef {
    Primary(usize),
    Overflow(OverflowId),
}

/// Every bucket of one array, mutably: rotated primaries, then the arena.
pub(crate) type BucketsMut<'a, K, V> = Chain<
    Chain<slice::IterMut<'a, Bucket<K, V>>, slice::IterMut<'a, Bucket<K, V>>>,
    slotmap::basic::ValuesMut<'a, OverflowId, Bucket<K, V>>,
>;

/// `2^B` primary buckets plus the overflow arena their chains live in.
///
/// An array with no primary buckets is the "not yet allocated" state of a
/// fresh table.
#[derive(Debug)]
pub(crate) struct BucketArray<K, V> {
    primary: Vec<Bucket<K, V>>,
    overflow: SlotMap<OverflowId, Bucket<K, V>>,
}

impl<K, V> BucketArray<K, V> {
    pub(crate) fn unallocated() -> Self {
        Self {
            primary: Vec::new(),
            overflow: SlotMap::with_key(),
        }
    }

    /// Allocate `2^b` empty buckets. For larger arrays, room for `2^(b-4)`
    /// overflow buckets is reserved up front.
    pub(crate) fn try_new(b: u8) -> Result<Self, TryReserveError> {
        let n = 1usize << b;
        let mut primary = Vec::new();
        primary.try_reserve_exact(n)?;
        primary.extend((0..n).map(|_| Bucket::new()));
        let spare = if b >= 4 { 1usize << (b - 4) } else { 0 };
        Ok(Self {
            primary,
            overflow: SlotMap::with_capacity_and_key(spare),
        })
    }

    #[inline]
    pub(crate) fn is_allocated(&self) -> bool {
        !self.primary.is_empty()
    }

    /// Number of primary buckets.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.primary.len()
    }

    pub(crate) fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    #[inline]
    pub(crate) fn get(&self, r: BucketRef) -> &Bucket<K, V> {
        match r {
            BucketRef::Primary(i) => &self.primary[i],
            BucketRef::Overflow(id) => &self.overflow[id],
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, r: BucketRef) -> &mut Bucket<K, V> {
        match r {
            BucketRef::Primary(i) => &mut self.primary[i],
            BucketRef::Overflow(id) => &mut self.overflow[id],
        }
    }

    #[inline]
    pub(crate) fn next(&self, r: BucketRef) -> Option<BucketRef> {
        self.get(r).overflow.map(BucketRef::Overflow)
    }

    /// Link a fresh overflow bucket after `tail`, which must end its chain.
    pub(crate) fn push_overflow(&mut self, tail: BucketRef) -> BucketRef {
        debug_assert!(self.get(tail).overflow.is_none());
        let id = self.overflow.insert(Bucket::new());
        self.get_mut(tail).overflow = Some(id);
        BucketRef::Overflow(id)
    }

    /// Whether primary bucket `i` (and so its whole chain) was evacuated.
    /// Evacuation tags every slot, so slot 0 decides.
    #[inline]
    pub(crate) fn is_evacuated(&self, i: usize) -> bool {
        self.primary[i].tags[0].is_evacuated()
    }

    /// The buckets of the chain rooted at primary bucket `i`, in order.
    pub(crate) fn chain(&self, i: usize) -> Vec<BucketRef> {
        let mut out = vec![BucketRef::Primary(i)];
        let mut r = BucketRef::Primary(i);
        while let Some(n) = self.next(r) {
            out.push(n);
            r = n;
        }
        out
    }

    /// Empty every bucket in place, keeping the allocations.
    pub(crate) fn reset(&mut self) {
        for b in &mut self.primary {
            *b = Bucket::new();
        }
        self.overflow.clear();
    }

    /// All buckets, primaries rotated to start at `start`, then overflow
    /// buckets. Chain order is not preserved.
    pub(crate) fn buckets_mut(&mut self, start: usize) -> BucketsMut<'_, K, V> {
        let start = if self.primary.is_empty() {
            0
        } else {
            start % self.primary.len()
        };
        let (head, tail) = self.primary.split_at_mut(start);
        tail.iter_mut()
            .chain(head.iter_mut())
            .chain(self.overflow.values_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tophash_skips_sentinels() {
        assert_eq!(tophash(0), MIN_TOP_HASH);
        assert_eq!(tophash(4u64 << 56), 4 + MIN_TOP_HASH);
        assert_eq!(tophash(5u64 << 56), 5);
        assert_eq!(tophash(u64::MAX), 0xff);
    }

    #[test]
    fn new_array_is_empty_and_sized() {
        let a: BucketArray<u32, u32> = BucketArray::try_new(3).unwrap();
        assert_eq!(a.len(), 8);
        assert!(a.is_allocated());
        assert!(!a.is_evacuated(0));
        assert!(a.get(BucketRef::Primary(7)).tags.iter().all(|t| *t == Tag::EmptyRest));
        assert!(!BucketArray::<u32, u32>::unallocated().is_allocated());
    }

    #[test]
    fn overflow_chain_links_in_order() {
        let mut a: BucketArray<u32, u32> = BucketArray::try_new(0).unwrap();
        let o1 = a.push_overflow(BucketRef::Primary(0));
        let o2 = a.push_overflow(o1);
        assert_eq!(a.chain(0), vec![BucketRef::Primary(0), o1, o2]);
        assert_eq!(a.overflow_len(), 2);
        a.reset();
        assert_eq!(a.chain(0), vec![BucketRef::Primary(0)]);
        assert_eq!(a.overflow_len(), 0);
    }

    #[test]
    fn evacuation_is_read_from_slot_zero() {
        let mut a: BucketArray<u32, u32> = BucketArray::try_new(1).unwrap();
        a.get_mut(BucketRef::Primary(1)).tags[0] = Tag::EvacuatedEmpty;
        assert!(a.is_evacuated(1));
        assert!(!a.is_evacuated(0));
    }
}
