//! Error types for the monitoring pipeline
//!
//! Every stage of an evaluation pass reports failures through [`MonitorError`].
//! The variants map one-to-one onto how the engine reacts:
//!
//! ```text
//! MalformedInput     → drop the payload, log, keep going
//! SourceUnavailable  → abort the rest of the pass, retry on the next trigger
//! RateLimited        → drop the notification, alert state is still updated
//! TransportFailure   → retried by the dispatcher, then reported as partial failure
//! Storage            → abort the rest of the pass / reject the push
//! ConfigInvalid      → fatal at startup
//! ```

use thiserror::Error;

use crate::event::ResourceKind;

/// Result type alias for pipeline operations
pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    /// A payload could not be turned into an `ObservedEvent`
    #[error("malformed {kind} payload: {reason}")]
    MalformedInput { kind: ResourceKind, reason: String },

    /// The resource source could not be reached or answered with garbage
    #[error("resource source unavailable: {0}")]
    SourceUnavailable(String),

    /// The per-topic token bucket had no token left within the queue bound
    #[error("rate limited on topic {topic}")]
    RateLimited { topic: String },

    /// The notification transport failed (after retries, if transient)
    #[error("notification transport failed: {message}")]
    TransportFailure { message: String, transient: bool },

    /// History or alert state could not be read or written
    #[error("storage failure: {0}")]
    Storage(String),

    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl From<crate::storage::StorageError> for MonitorError {
    fn from(err: crate::storage::StorageError) -> Self {
        MonitorError::Storage(err.to_string())
    }
}

impl MonitorError {
    pub fn malformed(kind: ResourceKind, reason: impl Into<String>) -> Self {
        MonitorError::MalformedInput {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether the dispatcher should try again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::TransportFailure {
                transient: true,
                ..
            }
        )
    }
}
