//! Federated identities: one per (caller, external user id).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::params::LaunchParams;

/// A local record of an LMS user as seen through one caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LtiUser {
    pub id: i64,
    pub account_id: Uuid,
    pub consumer_id: i64,
    pub lti_user_id: String,
    pub last_launch_parameters: LaunchParams,
    #[serde(with = "time::serde::rfc3339")]
    pub last_launch_time: OffsetDateTime,
}

/// Data for creating an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLtiUser {
    pub account_id: Uuid,
    pub consumer_id: i64,
    pub lti_user_id: String,
    pub last_launch_parameters: LaunchParams,
    pub last_launch_time: OffsetDateTime,
}

impl NewLtiUser {
    /// Materializes the identity under row id `id`.
    #[must_use]
    pub fn into_lti_user(self, id: i64) -> LtiUser {
        LtiUser {
            id,
            account_id: self.account_id,
            consumer_id: self.consumer_id,
            lti_user_id: self.lti_user_id,
            last_launch_parameters: self.last_launch_parameters,
            last_launch_time: self.last_launch_time,
        }
    }
}
