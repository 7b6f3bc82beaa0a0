// Copyright 2025 Cowboy AI, LLC.

//! Error types for correlation and aggregation operations

use std::time::Duration;
use thiserror::Error;

use crate::locking::LockError;
use crate::store::StoreError;

/// Errors that can occur while correlating and aggregating message events
#[derive(Debug, Clone, Error)]
pub enum CorrelationError {
    /// No correlation key could be derived from the event
    #[error("Not correlatable: {0}")]
    NotCorrelatable(String),

    /// Lock acquisition exceeded the configured timeout
    #[error("Lock timeout after {timeout:?} for key {key}")]
    LockTimeout {
        /// Correlation key whose lock was contended
        key: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Lock acquisition was interrupted before the lock was granted
    #[error("Lock acquisition interrupted for key {key}")]
    Interrupted {
        /// Correlation key whose lock was being acquired
        key: String,
    },

    /// No destination could be resolved for the target service
    #[error("Unresolvable destination for service {0}")]
    UnresolvableDestination(String),

    /// The backing group store is unavailable
    #[error("Group store unavailable: {0}")]
    StoreUnavailable(String),

    /// Downstream send failed after the group was already removed
    #[error("Send to {destination} failed after release: {reason}")]
    SendFailed {
        /// Destination the release was routed to
        destination: String,
        /// Failure reported by the transport
        reason: String,
    },

    /// Downstream send timed out after the group was already removed
    #[error("Send to {destination} timed out after {timeout:?}")]
    SendTimeout {
        /// Destination the release was routed to
        destination: String,
        /// Send timeout that elapsed
        timeout: Duration,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for correlation operations
pub type CorrelationResult<T> = Result<T, CorrelationError>;

impl CorrelationError {
    /// Check whether the condition is recoverable by redelivery or discard
    ///
    /// Recoverable conditions are handled at the aggregator boundary; the
    /// transport decides between retry and discard. Post-commit and store
    /// failures propagate for operator-visible handling instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CorrelationError::NotCorrelatable(_)
                | CorrelationError::LockTimeout { .. }
                | CorrelationError::Interrupted { .. }
        )
    }

    /// Check whether the failure happened after the group was removed
    ///
    /// A post-commit failure means the release decision already committed:
    /// the group is gone from the store and the emission failed afterwards.
    pub fn is_post_commit(&self) -> bool {
        matches!(
            self,
            CorrelationError::SendFailed { .. }
                | CorrelationError::SendTimeout { .. }
                | CorrelationError::UnresolvableDestination(_)
        )
    }
}

impl From<serde_json::Error> for CorrelationError {
    fn from(err: serde_json::Error) -> Self {
        CorrelationError::Serialization(err.to_string())
    }
}

impl From<StoreError> for CorrelationError {
    fn from(err: StoreError) -> Self {
        CorrelationError::StoreUnavailable(err.to_string())
    }
}

impl From<LockError> for CorrelationError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { key, timeout } => CorrelationError::LockTimeout { key, timeout },
            LockError::Interrupted { key } => CorrelationError::Interrupted { key },
        }
    }
}
