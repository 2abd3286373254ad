//! Tool provider registrations advertised to LMS auto-configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Course navigation visibility of a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Visible to everyone.
    #[default]
    All,
    /// Visible to course administrators only.
    Admins,
    /// Visible to course members only.
    Members,
}

impl Visibility {
    /// Returns the stored representation (`""`, `"admins"`, `"members"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "",
            Self::Admins => "admins",
            Self::Members => "members",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "admins" => Ok(Self::Admins),
            "members" => Ok(Self::Members),
            other => Err(format!("Invalid visibility: '{other}'")),
        }
    }
}

impl Serialize for Visibility {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Visibility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A tool this service exposes to LMSs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProvider {
    /// Unique slug used in the config URL.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: String,
    /// Path of the launch endpoint, relative to the public base URL.
    pub launch_path: String,
    #[serde(default)]
    pub visibility: Visibility,
}
