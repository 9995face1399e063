//! The windowed counter store and its increment protocol.
//!
//! [`WindowedCounterStore`] keeps, per client key, two co-expiring backend
//! entries: the hit counter itself and a sidecar entry holding the absolute
//! time at which the counting window ends. The backend offers no atomic
//! "increment or create", so [`increment`](CounterStore::increment)
//! optimistically increments first (the common case) and only pays the
//! create-with-retry cost on the first hit in a window, using conditional
//! `add` as the compare-and-create primitive. At most one concurrent caller
//! originates a window; the losers detect the conflict and converge onto the
//! atomic-increment path.

use crate::backend::{AddOutcome, CacheBackend};
use crate::error::StoreError;
use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default text prepended to every client key.
pub const DEFAULT_PREFIX: &str = "rl:";

/// Reserved sub-namespace, under the prefix, for window-expiry sidecar keys.
const EXPIRY_NAMESPACE: &str = "expiry:";

/// The result of recording one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// Total hits recorded for the client within the current window.
    pub total_hits: u64,
    /// When the current window ends and the counter expires.
    ///
    /// If the sidecar entry is gone (expired slightly before the counter, or
    /// lost its creation race), this falls back to "now": a deliberate,
    /// quasi-accurate approximation that understates the remaining window
    /// rather than failing the call.
    pub reset_time: SystemTime,
}

/// The interface rate-limiting middleware consumes.
///
/// Decouples the middleware from the concrete store the same way the
/// [`CacheBackend`] trait decouples the store from the cache.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// One-time configuration call: sets the window length.
    ///
    /// Precondition: must be called before any counting operation. Counting
    /// against an uninitialized (zero) window leaves entries without a TTL.
    fn init(&mut self, window: Duration);

    /// Record one hit for `client_key` and report the running total together
    /// with the window's reset time.
    async fn increment(&self, client_key: &str) -> Result<IncrementOutcome, StoreError>;

    /// Undo one hit for `client_key`. A missing counter is a no-op.
    async fn decrement(&self, client_key: &str) -> Result<(), StoreError>;

    /// Forget everything recorded for `client_key`. Idempotent.
    async fn reset_key(&self, client_key: &str) -> Result<(), StoreError>;
}

/// A per-client hit counter with a sliding window, stored in a cache backend.
///
/// The store itself holds only static configuration, so a single instance
/// can be shared behind an `Arc` and used concurrently for any number of
/// client keys; correctness under concurrency comes entirely from the
/// backend's atomicity guarantees plus the creation-race protocol.
#[derive(Debug)]
pub struct WindowedCounterStore<B> {
    backend: B,
    prefix: String,
    window: Duration,
}

/// Builder for [`WindowedCounterStore`]. Validates configuration up front so
/// a bad prefix fails store creation, not the first request.
#[derive(Debug)]
pub struct WindowedCounterStoreBuilder<B> {
    backend: B,
    prefix: String,
}

impl<B> WindowedCounterStoreBuilder<B> {
    /// Override the key prefix (default `"rl:"`).
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Validate the configuration and construct the store.
    ///
    /// # Errors
    /// Returns [`StoreError::Configuration`] if the prefix is empty or
    /// contains characters memcached keys cannot hold (whitespace, control
    /// characters).
    pub fn build(self) -> Result<WindowedCounterStore<B>, StoreError> {
        validate_prefix(&self.prefix)?;
        Ok(WindowedCounterStore {
            backend: self.backend,
            prefix: self.prefix,
            window: Duration::ZERO,
        })
    }
}

fn validate_prefix(prefix: &str) -> Result<(), StoreError> {
    if prefix.is_empty() {
        return Err(StoreError::Configuration("prefix cannot be empty".into()));
    }
    if prefix.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(StoreError::Configuration(
            "prefix cannot contain whitespace or control characters".into(),
        ));
    }
    Ok(())
}

impl<B> WindowedCounterStore<B>
where
    B: CacheBackend,
{
    /// Start building a store around `backend`.
    pub fn builder(backend: B) -> WindowedCounterStoreBuilder<B> {
        WindowedCounterStoreBuilder { backend, prefix: DEFAULT_PREFIX.to_string() }
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The cache key holding the hit counter for `client_key`.
    fn counter_key(&self, client_key: &str) -> String {
        format!("{}{}", self.prefix, client_key)
    }

    /// The sidecar key holding the window's end timestamp for `client_key`.
    ///
    /// Lives under a reserved `expiry:` sub-namespace of the prefix. A client
    /// key that itself begins with `expiry:` could collide with another
    /// client's sidecar; client keys are normally IP addresses or similar, so
    /// this residual risk is accepted rather than escaped away.
    fn expiry_key(&self, client_key: &str) -> String {
        format!("{}{}{}", self.prefix, EXPIRY_NAMESPACE, client_key)
    }

    /// Read the window's end from the sidecar entry, falling back to "now"
    /// when it is absent or unreadable.
    async fn window_reset_time(&self, expiry_key: &str) -> Result<SystemTime, StoreError> {
        let raw = self
            .backend
            .get(expiry_key)
            .await
            .map_err(|e| StoreError::backend("get", e))?;
        match raw {
            Some(data) => match parse_epoch_millis(&data) {
                Some(millis) => Ok(UNIX_EPOCH + Duration::from_millis(millis)),
                None => {
                    tracing::warn!(
                        key = %expiry_key,
                        "stored window reset timestamp is not a number; reporting now"
                    );
                    Ok(SystemTime::now())
                }
            },
            None => Ok(SystemTime::now()),
        }
    }

    /// Record the window's end in the sidecar entry, best effort.
    ///
    /// Losing the creation race is fine: a concurrent originator wrote a
    /// value milliseconds away from ours. A backend error is logged and
    /// swallowed; the counter was already created, and later reads fall back
    /// to "now" instead of failing.
    async fn record_reset_time(&self, expiry_key: &str, reset_millis: u64) {
        let value = reset_millis.to_string().into_bytes();
        if let Err(e) = self.backend.add(expiry_key, value, self.window).await {
            tracing::warn!(
                key = %expiry_key,
                error = %e,
                "failed to record window reset time"
            );
        }
    }
}

#[async_trait]
impl<B> CounterStore for WindowedCounterStore<B>
where
    B: CacheBackend,
{
    fn init(&mut self, window: Duration) {
        // Backend TTLs have whole-second resolution; drop any remainder.
        self.window = Duration::from_secs(window.as_secs());
    }

    async fn increment(&self, client_key: &str) -> Result<IncrementOutcome, StoreError> {
        let counter_key = self.counter_key(client_key);
        let expiry_key = self.expiry_key(client_key);

        // Common case first: the counter already exists and the backend
        // increments it atomically.
        let hits = self
            .backend
            .increment(&counter_key, 1)
            .await
            .map_err(|e| StoreError::backend("increment", e))?;
        if let Some(total_hits) = hits {
            let reset_time = self.window_reset_time(&expiry_key).await?;
            return Ok(IncrementOutcome { total_hits, reset_time });
        }

        // No counter yet. Try to originate the window; `add` stores only if
        // the key is still absent, so at most one concurrent caller wins.
        let outcome = self
            .backend
            .add(&counter_key, b"1".to_vec(), self.window)
            .await
            .map_err(|e| StoreError::backend("add", e))?;
        match outcome {
            AddOutcome::Stored => {
                // Truncate to milliseconds before use so the returned reset
                // time and the stored one name the same instant.
                let reset_millis = epoch_millis(SystemTime::now() + self.window);
                let reset_time = UNIX_EPOCH + Duration::from_millis(reset_millis);
                self.record_reset_time(&expiry_key, reset_millis).await;
                tracing::trace!(key = %counter_key, reset_millis, "originated counting window");
                Ok(IncrementOutcome { total_hits: 1, reset_time })
            }
            AddOutcome::Exists => {
                // A concurrent caller created the counter between our failed
                // increment and the add. Its counter is authoritative now;
                // one bounded retry converges onto it. If the backend claims
                // the key exists yet still cannot increment it, that is an
                // inconsistency we refuse to retry further.
                let total_hits = self
                    .backend
                    .increment(&counter_key, 1)
                    .await
                    .map_err(|e| StoreError::backend("increment", e))?
                    .ok_or_else(|| StoreError::ProtocolViolation { key: counter_key })?;
                let reset_time = self.window_reset_time(&expiry_key).await?;
                Ok(IncrementOutcome { total_hits, reset_time })
            }
        }
    }

    async fn decrement(&self, client_key: &str) -> Result<(), StoreError> {
        // Absent counters stay absent: the backend's decrement is a no-op on
        // a missing key, and the sidecar entry is never touched.
        self.backend
            .decrement(&self.counter_key(client_key), 1)
            .await
            .map_err(|e| StoreError::backend("decrement", e))?;
        Ok(())
    }

    async fn reset_key(&self, client_key: &str) -> Result<(), StoreError> {
        // Both deletes are issued regardless of whether the counter existed,
        // so no stale sidecar entry can outlive a reset.
        self.backend
            .delete(&self.counter_key(client_key))
            .await
            .map_err(|e| StoreError::backend("delete", e))?;
        self.backend
            .delete(&self.expiry_key(client_key))
            .await
            .map_err(|e| StoreError::backend("delete", e))?;
        Ok(())
    }
}

/// Milliseconds since the Unix epoch.
fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn parse_epoch_millis(data: &[u8]) -> Option<u64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;

    fn store_with_prefix(prefix: &str) -> WindowedCounterStore<InMemoryBackend> {
        WindowedCounterStore::builder(InMemoryBackend::new())
            .prefix(prefix)
            .build()
            .expect("valid prefix")
    }

    #[test]
    fn default_prefix_is_applied() {
        let store =
            WindowedCounterStore::builder(InMemoryBackend::new()).build().expect("valid config");
        assert_eq!(store.counter_key("1.2.3.4"), "rl:1.2.3.4");
        assert_eq!(store.expiry_key("1.2.3.4"), "rl:expiry:1.2.3.4");
    }

    #[test]
    fn custom_prefix_is_applied_to_both_keys() {
        let store = store_with_prefix("limits:");
        assert_eq!(store.counter_key("alice"), "limits:alice");
        assert_eq!(store.expiry_key("alice"), "limits:expiry:alice");
    }

    #[test]
    fn counter_and_sidecar_namespaces_are_disjoint() {
        let store = store_with_prefix("rl:");
        // No client key maps onto another client's sidecar unless it
        // literally starts with the reserved namespace.
        assert_ne!(store.counter_key("a"), store.expiry_key("a"));
        assert_eq!(store.counter_key("expiry:a"), store.expiry_key("a"));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let err = WindowedCounterStore::builder(InMemoryBackend::new())
            .prefix("")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn whitespace_and_control_prefixes_are_rejected() {
        for bad in ["rate limit:", "rl\t:", "rl\n:", "rl\u{7f}:"] {
            let err = WindowedCounterStore::builder(InMemoryBackend::new())
                .prefix(bad)
                .build()
                .unwrap_err();
            assert!(err.is_configuration(), "prefix {:?} should be rejected", bad);
        }
    }

    #[test]
    fn init_truncates_to_whole_seconds() {
        let mut store = store_with_prefix("rl:");
        store.init(Duration::from_millis(2750));
        assert_eq!(store.window(), Duration::from_secs(2));
    }

    #[test]
    fn epoch_millis_roundtrips_through_parsing() {
        let now = SystemTime::now();
        let millis = epoch_millis(now);
        let parsed = parse_epoch_millis(millis.to_string().as_bytes()).expect("numeric");
        assert_eq!(parsed, millis);
    }

    #[test]
    fn parse_epoch_millis_rejects_garbage() {
        assert_eq!(parse_epoch_millis(b"not-a-number"), None);
        assert_eq!(parse_epoch_millis(b""), None);
        assert_eq!(parse_epoch_millis(&[0xff, 0xfe]), None);
        assert_eq!(parse_epoch_millis(b"-5"), None);
    }
}
