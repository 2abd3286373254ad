//! The launch parameter bag.
//!
//! Whatever the LMS posts is kept verbatim: it is persisted on the identity
//! for auditing, for matching across instances and for rebuilding the return
//! URL. Only a minimal set of keys is required.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key carrying the caller identity.
pub const CONSUMER_KEY: &str = "oauth_consumer_key";
/// Key carrying the external user identifier.
pub const USER_ID: &str = "user_id";
/// Key carrying the LMS instance GUID.
pub const INSTANCE_GUID: &str = "tool_consumer_instance_guid";
/// Key carrying the URL to hand control back to the LMS.
pub const RETURN_URL: &str = "launch_presentation_return_url";
/// Key carrying the person's full name.
pub const PERSON_NAME_FULL: &str = "lis_person_name_full";
/// Key carrying the person's source identifier.
pub const PERSON_SOURCEDID: &str = "lis_person_sourcedid";
/// Canvas custom field carrying the login id.
pub const CANVAS_LOGIN_ID: &str = "custom_canvas_user_login_id";
/// Canvas custom field carrying the course id.
pub const CANVAS_COURSE_ID: &str = "custom_canvas_course_id";
/// Key carrying the comma separated role list.
pub const ROLES: &str = "roles";

/// Keys every launch must carry.
pub const REQUIRED_LAUNCH_KEYS: [&str; 2] = [CONSUMER_KEY, USER_ID];

const INSTRUCTOR_ROLES: [&str; 5] = [
    "urn:lti:role:ims/lis/TeachingAssistant",
    "Instructor",
    "ContentDeveloper",
    "urn:lti:role:ims/lis/Instructor",
    "urn:lti:role:ims/lis/ContentDeveloper",
];

/// String-keyed launch parameters as supplied by the LMS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchParams(BTreeMap<String, String>);

impl LaunchParams {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bag from decoded form pairs. Later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the value under `key` unless it is missing or empty.
    #[must_use]
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over all parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The external user identifier.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.get(USER_ID)
    }

    /// The LMS instance GUID, empty when absent.
    #[must_use]
    pub fn instance_guid(&self) -> &str {
        self.get(INSTANCE_GUID).unwrap_or_default()
    }

    /// The URL to hand control back to the LMS.
    #[must_use]
    pub fn return_url(&self) -> Option<&str> {
        self.get_non_empty(RETURN_URL)
    }

    /// The person's full name, if the LMS shared it.
    #[must_use]
    pub fn person_name(&self) -> Option<&str> {
        self.get_non_empty(PERSON_NAME_FULL)
    }

    /// The Canvas course id of the launch context.
    #[must_use]
    pub fn course_id(&self) -> Option<&str> {
        self.get_non_empty(CANVAS_COURSE_ID)
    }

    /// The launch roles, trimmed.
    #[must_use]
    pub fn roles(&self) -> Vec<&str> {
        self.get(ROLES)
            .map(|r| {
                r.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns `true` if any role grants instructor rights.
    #[must_use]
    pub fn is_instructor(&self) -> bool {
        self.roles()
            .iter()
            .any(|role| INSTRUCTOR_ROLES.contains(role))
    }
}

impl FromIterator<(String, String)> for LaunchParams {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
