//! Traversal: borrowing iterators and the detached `Cursor`.
//!
//! Both start at a random bucket and a random slot offset, walk every bucket
//! index once (wrapping around) and, while a resize is in flight, read
//! unevacuated old buckets in place of the new ones they feed. An old bucket
//! feeds two new buckets after a doubling, so only the entries headed for the
//! bucket being visited are yielded there.

use crate::bucket::{Bucket, BucketRef, BucketsMut, Entry, Tag, BUCKET_CNT};
use crate::descriptor::TypeDescriptor;
use crate::growth::{bucket_mask, bucket_shift};
use crate::map::BucketMap;
use crate::raw::RawTable;
use crate::write_flag::WriteFlag;
use core::iter::{FusedIterator, Zip};
use core::slice;
use std::collections::VecDeque;

const ITER_WRITE: &str = "concurrent map iteration and map write";

/// Random start bucket and in-bucket slot offset for a table of `2^b` buckets.
pub(crate) fn start_position(b: u8) -> (usize, usize) {
    let r = rand::random::<u64>();
    let start = r as usize & bucket_mask(b);
    let offset = r.checked_shr(u32::from(b)).unwrap_or(0) as usize & (BUCKET_CNT - 1);
    (start, offset)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Init,
    Iterating,
    Done,
}

/// Position inside the chain being walked.
#[derive(Copy, Clone)]
struct Walk {
    old: bool,
    bucket: BucketRef,
    slot: usize,
    /// Current bucket index the entries must be headed for (old chains only).
    check: Option<usize>,
}

/// Iterator over `(&K, &V)`, created by [`BucketMap::iter`].
pub struct Iter<'a, K, V, D> {
    raw: &'a RawTable<K, V, D>,
    writing: &'a WriteFlag,
    phase: Phase,
    start: usize,
    offset: usize,
    next_bucket: usize,
    wrapped: bool,
    walk: Option<Walk>,
    remaining: usize,
}

impl<'a, K, V, D> Iter<'a, K, V, D>
where
    D: TypeDescriptor<K>,
{
    pub(crate) fn new(raw: &'a RawTable<K, V, D>, writing: &'a WriteFlag) -> Self {
        let (start, offset) = start_position(raw.b);
        Self {
            raw,
            writing,
            phase: Phase::Init,
            start,
            offset,
            next_bucket: start,
            wrapped: false,
            walk: None,
            remaining: raw.count,
        }
    }

    /// Select the chain behind the next bucket index, or finish.
    fn open_bucket(&mut self) -> Option<Walk> {
        if self.wrapped && self.next_bucket == self.start {
            return None;
        }
        let bucket = self.next_bucket;
        let (old, src) = self.raw.source(bucket);
        self.next_bucket = (bucket + 1) & bucket_mask(self.raw.b);
        if self.next_bucket == 0 {
            self.wrapped = true;
        }
        Some(Walk {
            old,
            bucket: BucketRef::Primary(src),
            slot: 0,
            check: old.then_some(bucket),
        })
    }
}

impl<'a, K, V, D> Iterator for Iter<'a, K, V, D>
where
    D: TypeDescriptor<K>,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Init => self.phase = Phase::Iterating,
                Phase::Iterating => {}
            }
            if self.remaining == 0 {
                self.phase = Phase::Done;
                return None;
            }
            self.writing.check(ITER_WRITE);

            let walk = match self.walk {
                Some(w) => w,
                None => match self.open_bucket() {
                    Some(w) => w,
                    None => {
                        self.phase = Phase::Done;
                        return None;
                    }
                },
            };
            let raw = self.raw;
            let array = raw.array(walk.old);
            let b = array.get(walk.bucket);
            for i in walk.slot..BUCKET_CNT {
                let Some((top, e)) = b.live((i + self.offset) & (BUCKET_CNT - 1)) else {
                    continue;
                };
                if let Some(bucket) = walk.check {
                    if !raw.destined_for(&e.key, top, bucket) {
                        continue;
                    }
                }
                self.walk = Some(Walk { slot: i + 1, ..walk });
                self.remaining -= 1;
                return Some((&e.key, &e.value));
            }
            self.walk = array.next(walk.bucket).map(|n| Walk {
                bucket: n,
                slot: 0,
                ..walk
            });
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.phase {
            Phase::Done => (0, Some(0)),
            _ => (self.remaining, Some(self.remaining)),
        }
    }
}

impl<K, V, D: TypeDescriptor<K>> ExactSizeIterator for Iter<'_, K, V, D> {}
impl<K, V, D: TypeDescriptor<K>> FusedIterator for Iter<'_, K, V, D> {}

type Slots<'a, K, V> = Zip<slice::Iter<'a, Tag>, slice::IterMut<'a, Option<Entry<K, V>>>>;

/// Iterator over `(&K, &mut V)`, created by [`BucketMap::iter_mut`].
pub struct IterMut<'a, K, V> {
    buckets: BucketsMut<'a, K, V>,
    slots: Option<Slots<'a, K, V>>,
    remaining: usize,
}

impl<'a, K, V> IterMut<'a, K, V> {
    pub(crate) fn new(buckets: BucketsMut<'a, K, V>, remaining: usize) -> Self {
        Self {
            buckets,
            slots: None,
            remaining,
        }
    }
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            if let Some(slots) = &mut self.slots {
                for (tag, entry) in slots {
                    if let (Tag::Full(_), Some(e)) = (tag, entry) {
                        self.remaining -= 1;
                        return Some((&e.key, &mut e.value));
                    }
                }
            }
            let Bucket { tags, entries, .. } = self.buckets.next()?;
            let tags: &'a [Tag; BUCKET_CNT] = tags;
            self.slots = Some(tags.iter().zip(entries.iter_mut()));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

pub struct Keys<'a, K, V, D> {
    pub(crate) inner: Iter<'a, K, V, D>,
}

impl<'a, K, V, D: TypeDescriptor<K>> Iterator for Keys<'a, K, V, D> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, D: TypeDescriptor<K>> ExactSizeIterator for Keys<'_, K, V, D> {}
impl<K, V, D: TypeDescriptor<K>> FusedIterator for Keys<'_, K, V, D> {}

pub struct Values<'a, K, V, D> {
    pub(crate) inner: Iter<'a, K, V, D>,
}

impl<'a, K, V, D: TypeDescriptor<K>> Iterator for Values<'a, K, V, D> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, D: TypeDescriptor<K>> ExactSizeIterator for Values<'_, K, V, D> {}
impl<K, V, D: TypeDescriptor<K>> FusedIterator for Values<'_, K, V, D> {}

/// An entry collected by a cursor, waiting to be yielded.
enum Pending<K, V> {
    /// Re-read from the table when yielded.
    Key(K),
    /// A key that never equals itself cannot be looked up again; it is
    /// yielded as collected.
    Copied(K, V),
}

/// A traversal that does not borrow its table.
///
/// The table may be mutated, and may resize, between calls to
/// [`Cursor::next`]. Every key present for the whole traversal is yielded
/// exactly once; keys inserted or removed along the way may or may not be.
/// Values are read when yielded, so updates made mid-traversal are seen.
///
/// The cursor remembers the bucket count of the table when it was created.
/// Each step collects one of those original buckets from wherever its
/// entries live now: after the table has doubled, bucket `j` of a
/// `2^B`-bucket snapshot has spread over every current bucket whose index is
/// `j` modulo `2^B`.
pub struct Cursor<K, V> {
    map_id: u64,
    b: u8,
    start: usize,
    offset: usize,
    next_bucket: usize,
    wrapped: bool,
    done: bool,
    pending: VecDeque<Pending<K, V>>,
}

impl<K, V> Cursor<K, V> {
    pub(crate) fn new<D>(map: &BucketMap<K, V, D>) -> Self
    where
        D: TypeDescriptor<K>,
    {
        let raw = map.raw();
        let (start, offset) = start_position(raw.b);
        Self {
            map_id: map.id(),
            b: raw.b,
            start,
            offset,
            next_bucket: start,
            wrapped: false,
            done: raw.count == 0,
            pending: VecDeque::new(),
        }
    }

    /// True once every bucket has been visited and drained.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The next entry, cloned out of `map`.
    ///
    /// Panics if `map` is not the table this cursor was created from.
    pub fn next<D>(&mut self, map: &BucketMap<K, V, D>) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
        D: TypeDescriptor<K>,
    {
        assert!(
            map.id() == self.map_id,
            "cursor used with a different map"
        );
        if self.done {
            return None;
        }
        map.writing().check(ITER_WRITE);
        let raw = map.raw();
        loop {
            while let Some(p) = self.pending.pop_front() {
                match p {
                    Pending::Key(k) => {
                        if let Some(e) = raw.get_stored(&k) {
                            return Some((e.key.clone(), e.value.clone()));
                        }
                    }
                    Pending::Copied(k, v) => return Some((k, v)),
                }
            }
            if self.wrapped && self.next_bucket == self.start {
                self.done = true;
                return None;
            }
            let bucket = self.next_bucket;
            self.next_bucket = (bucket + 1) & bucket_mask(self.b);
            if self.next_bucket == 0 {
                self.wrapped = true;
            }
            raw.collect_class(bucket, self.b, self.offset, &mut self.pending);
        }
    }
}

impl<K, V, D> RawTable<K, V, D>
where
    K: Clone,
    V: Clone,
    D: TypeDescriptor<K>,
{
    /// Queue every live entry whose current bucket index is `class` modulo
    /// `2^b`, sourcing unevacuated old chains through the destination filter.
    fn collect_class(&self, class: usize, b: u8, offset: usize, out: &mut VecDeque<Pending<K, V>>) {
        if self.count == 0 {
            return;
        }
        let reflexive = self.descriptor.flags().reflexive_key;
        let step = bucket_shift(b);
        let mut c = class;
        while c < self.buckets.len() {
            let (old, src) = self.source(c);
            let array = self.array(old);
            let mut cur = Some(BucketRef::Primary(src));
            while let Some(r) = cur {
                let bucket = array.get(r);
                for i in 0..BUCKET_CNT {
                    let Some((top, e)) = bucket.live((i + offset) & (BUCKET_CNT - 1)) else {
                        continue;
                    };
                    if old && !self.destined_for(&e.key, top, c) {
                        continue;
                    }
                    if reflexive || self.descriptor.equal(&e.key, &e.key) {
                        out.push_back(Pending::Key(e.key.clone()));
                    } else {
                        out.push_back(Pending::Copied(e.key.clone(), e.value.clone()));
                    }
                }
                cur = array.next(r);
            }
            c += step;
        }
    }
}
