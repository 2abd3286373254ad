//! Local accounts.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A local application account. One account may be shared by several
/// identities when callers belong to the same trust group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Data for creating an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
}

impl NewAccount {
    /// Materializes the account with a fresh id.
    #[must_use]
    pub fn into_account(self) -> Account {
        Account {
            id: Uuid::new_v4(),
            username: self.username,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Builds the username for a provisioned account: the first `prefix_len`
/// characters of the caller's instance GUID followed by the first
/// `prefix_len` characters of the external user id.
///
/// Not unique on its own; the (caller, external id) pair is.
#[must_use]
pub fn synthetic_username(instance_guid: &str, lti_user_id: &str, prefix_len: usize) -> String {
    instance_guid
        .chars()
        .take(prefix_len)
        .chain(lti_user_id.chars().take(prefix_len))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_username_truncates_both_halves() {
        let name = synthetic_username(
            "0123456789abcdefghij",
            "user-0123456789-long",
            14,
        );
        assert_eq!(name, "0123456789abcduser-012345678");
    }

    #[test]
    fn test_synthetic_username_short_inputs() {
        assert_eq!(synthetic_username("", "user1", 14), "user1");
        assert_eq!(synthetic_username("g", "u", 14), "gu");
    }

    #[test]
    fn test_synthetic_username_counts_chars() {
        assert_eq!(synthetic_username("ééé", "üüü", 2), "ééüü");
    }
}
