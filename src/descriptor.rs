//! Key descriptors: how a table hashes and compares its keys.
//!
//! A [`TypeDescriptor`] is supplied once per table and never changes. The
//! table only ever calls it with keys of one type, so the descriptor is a
//! generic parameter and every call is statically dispatched.

use crate::error::HashError;
use core::hash::{BuildHasher, Hash, Hasher};
use hashbrown::hash_map::DefaultHashBuilder;

/// Behavioral flags of a key type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KeyFlags {
    /// `k == k` holds for every key. False for NaN-like keys, whose hash is
    /// not reproducible and which can never be looked up again.
    pub reflexive_key: bool,
    /// `hash` may return an error for some keys. When set, lookups on an
    /// empty table still hash the key so the error is reported.
    pub hash_may_fail: bool,
    /// Overwriting an entry through an equal key also replaces the stored
    /// key (`+0.0` replacing `-0.0`).
    pub needs_key_update: bool,
}

impl Default for KeyFlags {
    fn default() -> Self {
        Self {
            reflexive_key: true,
            hash_may_fail: false,
            needs_key_update: false,
        }
    }
}

/// Hash and equality for the keys of one table.
pub trait TypeDescriptor<K: ?Sized> {
    /// Hash `key` under the table's `seed`.
    fn hash(&self, key: &K, seed: u64) -> Result<u64, HashError>;

    fn equal(&self, a: &K, b: &K) -> bool;

    fn flags(&self) -> KeyFlags {
        KeyFlags::default()
    }
}

/// Descriptor for any `K: Hash + Eq`, hashing through a `BuildHasher`.
#[derive(Clone, Debug, Default)]
pub struct StdKeys<S = DefaultHashBuilder> {
    hasher: S,
}

impl<S> StdKeys<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }
}

impl<K, S> TypeDescriptor<K> for StdKeys<S>
where
    K: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &K, seed: u64) -> Result<u64, HashError> {
        let mut state = self.hasher.build_hasher();
        state.write_u64(seed);
        key.hash(&mut state);
        Ok(state.finish())
    }

    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// Descriptor for `f32`/`f64` keys with IEEE equality.
///
/// `+0.0` and `-0.0` are equal and hash alike; every NaN is unequal to
/// everything (itself included) and hashes to a fresh random value, so each
/// NaN insert creates a new entry.
#[derive(Clone, Debug, Default)]
pub struct FloatKeys<S = DefaultHashBuilder> {
    hasher: S,
}

impl<S> FloatKeys<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self { hasher }
    }
}

macro_rules! float_descriptor {
    ($($t:ty),*) => {$(
        impl<S: BuildHasher> TypeDescriptor<$t> for FloatKeys<S> {
            fn hash(&self, key: &$t, seed: u64) -> Result<u64, HashError> {
                let mut state = self.hasher.build_hasher();
                state.write_u64(seed);
                if key.is_nan() {
                    state.write_u32(rand::random::<u32>());
                } else if *key == 0.0 {
                    state.write_u8(0);
                } else {
                    key.to_bits().hash(&mut state);
                }
                Ok(state.finish())
            }

            #[inline]
            fn equal(&self, a: &$t, b: &$t) -> bool {
                a == b
            }

            fn flags(&self) -> KeyFlags {
                KeyFlags {
                    reflexive_key: false,
                    hash_may_fail: false,
                    needs_key_update: true,
                }
            }
        }
    )*};
}

float_descriptor!(f32, f64);
