//! The consumed cache interface.
//!
//! [`CacheBackend`] is the six-primitive surface the counter store needs from
//! a memcached-style cache: get/set/add/delete plus per-key atomic
//! increment/decrement, all with per-key TTLs. Implementations exist for an
//! in-process map ([`crate::InMemoryBackend`]) and, behind the `memcached`
//! feature, a real `async_memcached` client.
//!
//! Requiring the full trait at construction means a handle missing a
//! capability fails at compile time rather than at first use.

use async_trait::async_trait;
use std::time::Duration;

/// Result of a conditional [`CacheBackend::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The key was absent and the value was stored.
    Stored,
    /// The key already existed; nothing was written.
    Exists,
}

impl AddOutcome {
    /// Helper to check whether the add won.
    pub fn is_stored(&self) -> bool {
        matches!(self, AddOutcome::Stored)
    }
}

/// Minimal key-value cache interface with memcached semantics.
///
/// Values are opaque bytes except where a numeric counter is concerned:
/// [`increment`](CacheBackend::increment) and
/// [`decrement`](CacheBackend::decrement) operate on values that hold an
/// unsigned decimal number, atomically per key, and report the new value.
///
/// A `ttl` of zero means the entry never expires (memcached convention).
/// TTLs have whole-second resolution; sub-second remainders are dropped.
///
/// Implementations must be safe for concurrent use from many tasks; the
/// store holds no locks of its own.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Error type for backend operations. Anything other than the absent /
    /// already-exists signals encoded in the return types below is an error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Unconditionally store `value` under `key`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Self::Error>;

    /// Store `value` under `key` only if the key is absent.
    ///
    /// This is the sole compare-and-create primitive available, and the
    /// store leans on it to make sure at most one concurrent caller
    /// originates a counting window.
    async fn add(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<AddOutcome, Self::Error>;

    /// Delete `key`. Deleting an absent key is success.
    async fn delete(&self, key: &str) -> Result<(), Self::Error>;

    /// Atomically add `delta` to the numeric value under `key`.
    ///
    /// Returns the new value, or `None` if the key is absent. Incrementing
    /// a key that holds a non-numeric value is a backend error.
    async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error>;

    /// Atomically subtract `delta` from the numeric value under `key`,
    /// flooring at zero (memcached semantics).
    ///
    /// Returns the new value, or `None` if the key is absent (a no-op:
    /// decrement never creates a key).
    async fn decrement(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error>;
}
