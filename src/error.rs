//! Error types for the `bucket-map` crate.

use std::collections::TryReserveError;

/// A key rejected by its [`TypeDescriptor`](crate::TypeDescriptor) hash.
///
/// This is the Rust face of hashing an always-invalid key (an interface
/// value wrapping an unhashable type, for instance). The table is never
/// modified when this is returned.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("hash of unhashable type {type_name}")]
pub struct HashError {
    type_name: &'static str,
}

impl HashError {
    pub fn unhashable(type_name: &'static str) -> Self {
        Self { type_name }
    }

    /// Name of the type the descriptor refused to hash.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Errors surfaced by the fallible (`try_*`) table operations.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The descriptor refused to hash the key.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Reserving a new bucket array failed.
    ///
    /// The array is allocated before anything is swapped, so the table is
    /// left exactly as it was before the call.
    #[error("failed to allocate a bucket array of {buckets} buckets")]
    Alloc {
        buckets: usize,
        #[source]
        source: TryReserveError,
    },
}
