//! Server-side launch sessions.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Number of random bytes in a session token.
const TOKEN_BYTES: usize = 32;

/// Generates a random 256-bit session token, hex encoded.
#[must_use]
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A session established by a successful launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSession {
    pub token: String,
    pub account_id: Uuid,
    pub identity_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl LaunchSession {
    /// Creates a session for `identity_id` valid for `lifetime`. Expiry
    /// saturates at the largest representable date.
    #[must_use]
    pub fn new(account_id: Uuid, identity_id: i64, lifetime: std::time::Duration) -> Self {
        let created_at = OffsetDateTime::now_utc();
        let expires_at = time::Duration::try_from(lifetime)
            .ok()
            .and_then(|lifetime| created_at.checked_add(lifetime))
            .unwrap_or_else(|| Date::MAX.midnight().assume_utc());
        Self {
            token: generate_session_token(),
            account_id,
            identity_id,
            created_at,
            expires_at,
        }
    }

    /// Returns `true` once the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Returns `true` if the session is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_token_is_256_bit_hex() {
        let token = generate_session_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_session_token());
    }

    #[test]
    fn test_expiry() {
        let session = LaunchSession::new(Uuid::new_v4(), 1, Duration::from_secs(60));
        assert!(!session.is_expired());
        assert!(session.is_expired_at(session.created_at + Duration::from_secs(60)));
        assert!(!session.is_expired_at(session.created_at + Duration::from_secs(59)));
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let session = LaunchSession::new(Uuid::new_v4(), 1, Duration::MAX);
        assert_eq!(session.expires_at, Date::MAX.midnight().assume_utc());
        assert!(!session.is_expired());
    }
}
