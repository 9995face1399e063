#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Memtally
//!
//! A windowed hit counter store for rate-limiting middleware, backed by a
//! remote cache with memcached semantics.
//!
//! The store tracks, per client key, a hit count and the time at which the
//! current counting window ends. The backend is only assumed to offer per-key
//! atomic increment/decrement, non-atomic get/set, conditional add, and
//! delete, with no multi-key transactions and no CAS. The interesting part is
//! the [`increment`](store::CounterStore::increment) protocol, which gets
//! atomic-enough create-with-expiry semantics out of those primitives.
//!
//! ## Quick Start
//!
//! ```rust
//! use memtally::{CounterStore, InMemoryBackend, WindowedCounterStore};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), memtally::StoreError> {
//!     let mut store = WindowedCounterStore::builder(InMemoryBackend::new()).build()?;
//!     store.init(Duration::from_secs(60));
//!
//!     let hit = store.increment("1.2.3.4").await?;
//!     assert_eq!(hit.total_hits, 1);
//!
//!     store.decrement("1.2.3.4").await?;
//!     store.reset_key("1.2.3.4").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Backends
//!
//! - [`InMemoryBackend`]: in-process, TTL-aware; suitable for tests and
//!   single-process deployments.
//! - `MemcachedBackend` (feature `memcached`): wraps an
//!   `async_memcached::Client` for shared, multi-instance counting.
//!
//! Any other backend can be plugged in by implementing [`CacheBackend`].

pub mod backend;
pub mod error;
#[cfg(feature = "memcached")]
pub mod memcached;
pub mod memory;
pub mod store;

// Re-exports
pub use backend::{AddOutcome, CacheBackend};
pub use error::StoreError;
#[cfg(feature = "memcached")]
pub use memcached::MemcachedBackend;
pub use memory::InMemoryBackend;
pub use store::{
    CounterStore, IncrementOutcome, WindowedCounterStore, WindowedCounterStoreBuilder,
};
