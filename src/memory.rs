//! In-process cache backend.
//!
//! [`InMemoryBackend`] implements [`CacheBackend`] over a shared map with
//! lazily-enforced TTLs, mirroring memcached's observable behavior closely
//! enough for tests and for single-process deployments. Counts held here are
//! not shared across instances.

use crate::backend::{AddOutcome, CacheBackend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error type for [`InMemoryBackend`] operations.
#[derive(Debug, Error)]
pub enum InMemoryError {
    /// Increment/decrement was applied to a value that does not hold an
    /// unsigned decimal number. Memcached reports `CLIENT_ERROR` here.
    #[error("cannot increment or decrement non-numeric value under {key:?}")]
    NonNumericValue {
        /// The offending key.
        key: String,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    // None means the entry never expires (zero TTL, memcached convention).
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        Self { data, expires_at }
    }

    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// A TTL-aware in-process [`CacheBackend`].
///
/// Cloning is cheap and clones share the same underlying map, so a test can
/// hold a handle onto the map a store is using and inspect it directly.
/// Expired entries are pruned lazily on access.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry, live or expired.
    pub fn flush(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of live entries currently held.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.is_live());
        entries.len()
    }

    /// Whether the backend currently holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `delta` to the numeric value under `key`, pruning the entry if
    /// it has expired. `apply` decides the arithmetic (add vs. floored sub).
    fn adjust(
        &self,
        key: &str,
        apply: impl FnOnce(u64) -> u64,
    ) -> Result<Option<u64>, InMemoryError> {
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(key), Some(entry) if !entry.is_live()) {
            entries.remove(key);
            return Ok(None);
        }
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let current = parse_number(&entry.data)
            .ok_or_else(|| InMemoryError::NonNumericValue { key: key.to_string() })?;
        let updated = apply(current);
        entry.data = updated.to_string().into_bytes();
        Ok(Some(updated))
    }
}

fn parse_number(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    type Error = InMemoryError;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(key), Some(entry) if !entry.is_live()) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.data.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Self::Error> {
        self.entries.lock().unwrap().insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<AddOutcome, Self::Error> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).is_some_and(Entry::is_live) {
            return Ok(AddOutcome::Exists);
        }
        entries.insert(key.to_string(), Entry::new(value, ttl));
        Ok(AddOutcome::Stored)
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        // Absent and present both count as success.
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error> {
        self.adjust(key, |current| current.saturating_add(delta))
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error> {
        // Memcached floors decrements at zero rather than going negative.
        self.adjust(key, |current| current.saturating_sub(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_EXPIRY: Duration = Duration::ZERO;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"v".to_vec(), NO_EXPIRY).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn get_of_absent_key_is_none() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_stores_only_when_absent() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.add("k", b"1".to_vec(), NO_EXPIRY).await.unwrap(), AddOutcome::Stored);
        assert_eq!(backend.add("k", b"2".to_vec(), NO_EXPIRY).await.unwrap(), AddOutcome::Exists);
        assert_eq!(backend.get("k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"v".to_vec(), Duration::from_millis(40)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        // The slot is free again for a conditional add.
        assert_eq!(
            backend.add("k", b"fresh".to_vec(), NO_EXPIRY).await.unwrap(),
            AddOutcome::Stored
        );
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"v".to_vec(), NO_EXPIRY).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn increment_counts_and_decrement_floors_at_zero() {
        let backend = InMemoryBackend::new();
        backend.set("n", b"1".to_vec(), NO_EXPIRY).await.unwrap();

        assert_eq!(backend.increment("n", 1).await.unwrap(), Some(2));
        assert_eq!(backend.decrement("n", 1).await.unwrap(), Some(1));
        assert_eq!(backend.decrement("n", 1).await.unwrap(), Some(0));
        assert_eq!(backend.decrement("n", 1).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn increment_of_absent_key_is_none() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.increment("missing", 1).await.unwrap(), None);
        assert_eq!(backend.decrement("missing", 1).await.unwrap(), None);
        // Neither created a record.
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn increment_of_expired_key_is_none() {
        let backend = InMemoryBackend::new();
        backend.set("n", b"5".to_vec(), Duration::from_millis(40)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.increment("n", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_of_non_numeric_value_errors() {
        let backend = InMemoryBackend::new();
        backend.set("blob", b"not a number".to_vec(), NO_EXPIRY).await.unwrap();
        let err = backend.increment("blob", 1).await.unwrap_err();
        assert!(matches!(err, InMemoryError::NonNumericValue { .. }));
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_success() {
        let backend = InMemoryBackend::new();
        backend.delete("missing").await.unwrap();
        backend.set("k", b"v".to_vec(), NO_EXPIRY).await.unwrap();
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clones_share_the_same_map() {
        let backend = InMemoryBackend::new();
        let observer = backend.clone();
        backend.set("k", b"v".to_vec(), NO_EXPIRY).await.unwrap();
        assert_eq!(observer.get("k").await.unwrap(), Some(b"v".to_vec()));
        observer.flush();
        assert!(backend.is_empty());
    }
}
