//! Trusted callers (LMS registrations) and trust groups.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Length of generated consumer keys and secrets.
pub const GENERATED_CREDENTIAL_LEN: usize = 40;

/// Returns a random alphanumeric string of `len` characters.
#[must_use]
pub fn generate_random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A named set of callers whose users are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerGroup {
    /// Row id.
    pub id: i64,
    /// Unique group name.
    pub name: String,
}

/// A registered LMS instance allowed to launch the tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConsumer {
    /// Row id.
    pub id: i64,

    /// Display name, shown as the source LMS.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Globally unique OAuth consumer key.
    pub consumer_key: String,

    /// Shared OAuth secret.
    #[serde(skip_serializing)]
    pub consumer_secret: String,

    /// Registered `tool_consumer_instance_guid`.
    #[serde(default)]
    pub instance_guid: Option<String>,

    /// Reject launches whose instance GUID differs from the registered one.
    #[serde(default)]
    pub match_guid_and_consumer: bool,

    /// Recently seen nonces, newest first.
    #[serde(default)]
    pub recent_nonces: Vec<String>,

    /// Trust group membership.
    #[serde(default)]
    pub group_id: Option<i64>,

    /// Registered identity matcher name.
    #[serde(default)]
    pub matcher: Option<String>,
}

impl ToolConsumer {
    /// The registered instance GUID, empty when unset.
    #[must_use]
    pub fn instance_guid(&self) -> &str {
        self.instance_guid.as_deref().unwrap_or_default()
    }

    /// Returns `true` if the launch's instance GUID is acceptable.
    #[must_use]
    pub fn accepts_instance(&self, supplied: &str) -> bool {
        !self.match_guid_and_consumer || self.instance_guid() == supplied
    }
}

/// Data for registering a new caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewToolConsumer {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    #[serde(default)]
    pub instance_guid: Option<String>,
    #[serde(default)]
    pub match_guid_and_consumer: bool,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub matcher: Option<String>,
}

impl NewToolConsumer {
    /// A caller with generated key and secret.
    #[must_use]
    pub fn with_generated_credentials(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumer_key: generate_random_string(GENERATED_CREDENTIAL_LEN),
            consumer_secret: generate_random_string(GENERATED_CREDENTIAL_LEN),
            ..Self::default()
        }
    }

    /// Materializes the registration under row id `id`.
    #[must_use]
    pub fn into_consumer(self, id: i64) -> ToolConsumer {
        ToolConsumer {
            id,
            name: self.name,
            description: self.description,
            consumer_key: self.consumer_key,
            consumer_secret: self.consumer_secret,
            instance_guid: self.instance_guid,
            match_guid_and_consumer: self.match_guid_and_consumer,
            recent_nonces: Vec::new(),
            group_id: self.group_id,
            matcher: self.matcher,
        }
    }
}
