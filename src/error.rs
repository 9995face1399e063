//! Error types for the counter store.

use thiserror::Error;

/// Unified error type for store construction and counting operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid configuration supplied at construction (e.g. a key prefix
    /// memcached would reject). Raised synchronously by the builder.
    #[error("invalid store configuration: {0}")]
    Configuration(String),

    /// A backend operation failed for a reason other than the expected
    /// absent / already-exists signals (network error, protocol error,
    /// timeout). Carries the primitive that failed.
    #[error("cache backend {op} failed: {source}")]
    Backend {
        /// The backend primitive that failed (`"get"`, `"add"`, ...).
        op: &'static str,
        /// The backend's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The backend reported the counter as existing yet refused to increment
    /// it, after the full increment protocol had run. Indicates backend
    /// misbehavior, surfaced distinctly so callers can tell "rate limiting
    /// is broken" from "request denied".
    #[error("counter {key:?} exists but the backend could not increment it")]
    ProtocolViolation {
        /// The counter key the backend misbehaved on.
        key: String,
    },
}

impl StoreError {
    pub(crate) fn backend<E>(op: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend { op, source: Box::new(source) }
    }

    /// Check if this error came from the cache backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }

    /// Check if this error was raised at construction time.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if this error is a backend-consistency violation.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// The backend primitive that failed, if this is a backend error.
    pub fn failed_op(&self) -> Option<&'static str> {
        match self {
            Self::Backend { op, .. } => Some(op),
            _ => None,
        }
    }
}
