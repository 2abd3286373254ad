//! Replay protection for signed launches.
//!
//! Each caller keeps a short, fixed-capacity history of the nonces it has
//! sent, newest first. Every attempt is recorded, accepted or not, so the
//! history never grows past its capacity and old values age out. A nonce
//! older than `capacity` requests is no longer detected.
//!
//! Timestamps further than the tolerance from server time (in either
//! direction) are rejected.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::LaunchResult;
use crate::config::NonceConfig;
use crate::error::LaunchError;
use crate::storage::ConsumerStorage;
use crate::types::ToolConsumer;

/// Bounded FIFO of recently seen nonces, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NonceHistory(Vec<String>);

impl NonceHistory {
    /// Wraps a stored history (newest first).
    #[must_use]
    pub fn from_vec(entries: Vec<String>) -> Self {
        Self(entries)
    }

    /// Returns `true` if `nonce` is in the history.
    #[must_use]
    pub fn contains(&self, nonce: &str) -> bool {
        self.0.iter().any(|n| n == nonce)
    }

    /// Prepends `nonce`, dropping the oldest entries beyond `capacity`.
    pub fn push(&mut self, nonce: &str, capacity: usize) {
        self.0.insert(0, nonce.to_string());
        self.0.truncate(capacity);
    }

    /// The entries, newest first.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consumes the history.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Number of retained nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of a nonce/timestamp check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceVerdict {
    /// Fresh nonce, timestamp within tolerance.
    Accepted,
    /// Nonce already present in the caller's history.
    Replayed,
    /// Timestamp outside the tolerance window.
    Stale {
        /// Absolute skew in seconds.
        skew_secs: i64,
    },
}

impl NonceVerdict {
    /// Returns `true` for [`NonceVerdict::Accepted`].
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Converts a rejection into the matching [`LaunchError`].
    ///
    /// # Errors
    ///
    /// Returns `ReplayedNonce` or `StaleTimestamp` for rejected verdicts.
    pub fn into_result(self, nonce: &str, timestamp: i64) -> LaunchResult<()> {
        match self {
            Self::Accepted => Ok(()),
            Self::Replayed => Err(LaunchError::ReplayedNonce {
                nonce: nonce.to_string(),
            }),
            Self::Stale { skew_secs } => Err(LaunchError::StaleTimestamp {
                timestamp,
                skew_secs,
            }),
        }
    }
}

/// Checks and records nonces against persisted caller histories.
#[derive(Clone)]
pub struct NonceGuard {
    consumers: Arc<dyn ConsumerStorage>,
    tolerance: Duration,
    capacity: usize,
}

impl NonceGuard {
    /// Creates a guard backed by `consumers`.
    pub fn new(consumers: Arc<dyn ConsumerStorage>, config: &NonceConfig) -> Self {
        Self {
            consumers,
            tolerance: config.timestamp_tolerance,
            capacity: config.capacity,
        }
    }

    /// Records `nonce` for `consumer` and judges it against server time.
    pub async fn record_and_check(
        &self,
        consumer: &ToolConsumer,
        nonce: &str,
        timestamp: i64,
    ) -> LaunchResult<NonceVerdict> {
        self.record_and_check_at(consumer, nonce, timestamp, OffsetDateTime::now_utc())
            .await
    }

    /// Same as [`Self::record_and_check`] with an explicit clock.
    pub async fn record_and_check_at(
        &self,
        consumer: &ToolConsumer,
        nonce: &str,
        timestamp: i64,
        now: OffsetDateTime,
    ) -> LaunchResult<NonceVerdict> {
        let previous = self
            .consumers
            .record_nonce(consumer.id, nonce, self.capacity)
            .await?;

        let skew_secs = now.unix_timestamp().saturating_sub(timestamp).saturating_abs();
        let tolerance = i64::try_from(self.tolerance.as_secs()).unwrap_or(i64::MAX);

        let verdict = if previous.contains(nonce) {
            NonceVerdict::Replayed
        } else if skew_secs > tolerance {
            NonceVerdict::Stale { skew_secs }
        } else {
            NonceVerdict::Accepted
        };

        if !verdict.is_accepted() {
            tracing::debug!(
                consumer_key = %consumer.consumer_key,
                nonce = %nonce,
                ?verdict,
                "Nonce check failed"
            );
        }
        Ok(verdict)
    }
}

impl std::fmt::Debug for NonceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceGuard")
            .field("tolerance", &self.tolerance)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
