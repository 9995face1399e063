//! Memcached cache backend (feature `memcached`).
//!
//! Bring your own [`async_memcached::Client`], or connect to a single node.
//! The client requires `&mut self` for every operation and is not internally
//! synchronized, so it sits behind an async mutex; for high-throughput
//! deployments, construct one store per connection instead of sharing one.

use crate::backend::{AddOutcome, CacheBackend};
use async_memcached::{AsciiProtocol, Client, Error, Status};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default single-node location, matching a locally running memcached.
pub const DEFAULT_LOCATION: &str = "localhost:11211";

/// A [`CacheBackend`] over a memcached connection.
pub struct MemcachedBackend {
    client: Mutex<Client>,
}

impl std::fmt::Debug for MemcachedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedBackend").field("client", &"<async_memcached::Client>").finish()
    }
}

impl MemcachedBackend {
    /// Connect to a memcached node at `location` (`host:port`).
    pub async fn connect(location: &str) -> Result<Self, Error> {
        let client = Client::new(location).await?;
        tracing::debug!(%location, "memcached backend connected");
        Ok(Self::from_client(client))
    }

    /// Connect to [`DEFAULT_LOCATION`].
    pub async fn connect_default() -> Result<Self, Error> {
        Self::connect(DEFAULT_LOCATION).await
    }

    /// Wrap an already-constructed client.
    pub fn from_client(client: Client) -> Self {
        Self { client: Mutex::new(client) }
    }
}

/// Memcached expirations are whole seconds.
fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs() as i64
}

/// Absent keys surface as a protocol status, not as a transport error.
fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Protocol(Status::NotFound))
}

#[async_trait]
impl CacheBackend for MemcachedBackend {
    type Error = Error;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut client = self.client.lock().await;
        match client.get(key).await {
            Ok(value) => Ok(value.and_then(|v| v.data)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Self::Error> {
        let mut client = self.client.lock().await;
        client.set(key, &value[..], Some(ttl_secs(ttl)), None).await
    }

    async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<AddOutcome, Self::Error> {
        let mut client = self.client.lock().await;
        match client.add(key, &value[..], Some(ttl_secs(ttl)), None).await {
            Ok(()) => Ok(AddOutcome::Stored),
            // NOT_STORED is memcached for "the key already exists".
            Err(Error::Protocol(Status::NotStored)) => Ok(AddOutcome::Exists),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        let mut client = self.client.lock().await;
        match client.delete(key).await {
            Ok(()) => Ok(()),
            // Deleting an absent key counts as success.
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error> {
        let mut client = self.client.lock().await;
        match client.increment(key, delta).await {
            Ok(new_value) => Ok(Some(new_value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error> {
        let mut client = self.client.lock().await;
        match client.decrement(key, delta).await {
            Ok(new_value) => Ok(Some(new_value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
