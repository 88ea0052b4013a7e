//! bucket-map: a hash map with 8-slot buckets, overflow chaining and
//! incremental resizing.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a table whose worst-case insert stays cheap even while it
//!   resizes, with iteration that stays correct across a resize.
//! - Layers:
//!   - `BucketArray<K, V>` (`bucket`): `2^B` primary buckets plus a
//!     `SlotMap` arena holding the overflow buckets chained off them.
//!   - `RawTable<K, V, D>` (`raw`, `growth`): lookup, insert, delete,
//!     grow decisions and incremental evacuation over one current and,
//!     while growing, one old bucket array.
//!   - `BucketMap<K, V, D>` (`map`): public API; wraps the raw table with
//!     a write flag that catches concurrent or re-entrant mutation.
//!   - `Iter`/`IterMut`/`Cursor` (`iter`): traversal.
//!
//! Buckets and tags
//! - Each slot carries a `Tag`: the top byte of the key's hash (shifted
//!   above the sentinel range) or a sentinel. `EmptyRest` ends every scan
//!   early; `EmptyOne` is a hole to step over. Deletes turn trailing holes
//!   back into `EmptyRest`, walking back across the chain.
//! - Evacuated old slots are retagged `EvacuatedLow`, `EvacuatedHigh` or
//!   `EvacuatedEmpty`, so "has this old bucket moved yet" is a one-slot
//!   read and no separate bitmap is kept.
//!
//! Growth
//! - Doubling when the next insert would push the average load above 6.5
//!   entries per bucket (a single bucket holds 8). Same-size rebuild when
//!   there are about as many overflow buckets as primary buckets, which
//!   happens under insert/delete churn that leaves chains long and sparse.
//! - Starting a grow only allocates. Each later insert or delete evacuates
//!   the old bucket it touches plus the one under the evacuation cursor;
//!   when the cursor reaches the end the old array is dropped.
//! - After a doubling, old bucket `i` splits into new buckets `i` and
//!   `i + old_len` by one hash bit. Keys that are not equal to themselves
//!   (NaN) have no reproducible hash; the low bit of their stored tag picks
//!   the half instead, and iterators apply the same rule.
//!
//! Descriptors
//! - Hashing and equality come from a `TypeDescriptor`, a generic parameter
//!   fixed per table. `StdKeys` covers every `K: Hash + Eq`; `FloatKeys`
//!   gives IEEE semantics to `f32`/`f64` keys. Hashes are seeded per table
//!   and the seed is redrawn whenever the table becomes empty.
//!
//! Concurrency
//! - Not internally synchronized. A relaxed atomic "writing" flag is set
//!   around every mutation so a second writer, or a reader or iterator
//!   overlapping a writer, panics with high probability. Wrap the table in
//!   a lock to share it.
//!
//! Iteration
//! - `Iter` borrows the table, starts at a random bucket and slot offset,
//!   and while a resize is in flight reads unevacuated old buckets,
//!   yielding only the entries headed for the bucket being visited.
//! - `Cursor` holds no borrow, so the table can change between steps. It
//!   collects one original bucket at a time from wherever its entries live
//!   now and re-reads each entry when yielding it: deleted keys are skipped
//!   and updated values observed.
//!
//! Notes and non-goals
//! - The table never shrinks; `clear` keeps the current bucket array.
//! - Keys and values are stored inline. Store a `Box<T>` for indirection.
//! - Allocation failure of a bucket array is reported by the `try_*`
//!   operations and leaves the table untouched.

mod bucket;
mod descriptor;
mod error;
mod growth;
mod iter;
mod map;
mod map_proptest;
mod raw;
mod write_flag;

// Public surface
pub use descriptor::{FloatKeys, KeyFlags, StdKeys, TypeDescriptor};
pub use error::{Error, HashError};
pub use iter::{Cursor, Iter, IterMut, Keys, Values};
pub use map::{BucketMap, TableStats};
