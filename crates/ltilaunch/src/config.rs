//! Launch and session configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [lti]
//! launch_redirect = "/"
//! default_matcher = "external_id"
//!
//! [lti.nonce]
//! timestamp_tolerance = "30s"
//! capacity = 10
//!
//! [session]
//! cookie_name = "ltilaunch_session"
//! lifetime = "8h"
//! ```

use std::time::Duration;

use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

use crate::matcher::MatcherKind;

/// LTI launch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LtiConfig {
    /// Replay protection settings.
    pub nonce: NonceConfig,

    /// Path the browser is sent to after a successful launch.
    pub launch_redirect: String,

    /// Length of each half of a synthetic username
    /// (instance GUID prefix + external user id prefix).
    pub username_prefix_len: usize,

    /// Honour `X-Forwarded-Proto` / `X-Forwarded-Host` when rebuilding the
    /// URL the LMS signed. Only enable behind a trusted reverse proxy.
    pub trust_forwarded_headers: bool,

    /// Matcher used for callers that do not name one.
    pub default_matcher: String,
}

impl Default for LtiConfig {
    fn default() -> Self {
        Self {
            nonce: NonceConfig::default(),
            launch_redirect: "/".to_string(),
            username_prefix_len: 14,
            trust_forwarded_headers: false,
            default_matcher: MatcherKind::ExternalId.as_str().to_string(),
        }
    }
}

/// Replay protection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Maximum distance between `oauth_timestamp` and server time.
    #[serde(with = "humantime_serde")]
    pub timestamp_tolerance: Duration,

    /// Number of recent nonces retained per caller.
    pub capacity: usize,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance: Duration::from_secs(30),
            capacity: 10,
        }
    }
}

/// Longest accepted `session.lifetime`.
pub const MAX_SESSION_LIFETIME: Duration = Duration::from_secs(366 * 24 * 3600);

/// Launch session cookie settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,

    /// How long a launch session stays valid.
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,

    /// Set the `Secure` attribute.
    pub secure: bool,

    /// `SameSite` attribute: "strict", "lax" or "none".
    /// LMS launches happen inside iframes, so the default is "none".
    pub same_site: String,

    /// Cookie path.
    pub path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "ltilaunch_session".to_string(),
            lifetime: Duration::from_secs(8 * 3600),
            secure: true,
            same_site: "none".to_string(),
            path: "/".to_string(),
        }
    }
}

impl SessionConfig {
    fn parse_same_site(&self) -> Option<SameSite> {
        match self.same_site.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }

    /// Builds the session cookie carrying `token`.
    #[must_use]
    pub fn build_cookie(&self, token: &str) -> Cookie<'static> {
        let max_age = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);
        Cookie::build((self.cookie_name.clone(), token.to_string()))
            .path(self.path.clone())
            .http_only(true)
            .secure(self.secure)
            .same_site(self.parse_same_site().unwrap_or(SameSite::Lax))
            .max_age(time::Duration::seconds(max_age))
            .build()
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl LtiConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the nonce capacity or timestamp
    /// tolerance is zero, the username prefix is zero, the redirect target is
    /// empty or the default matcher is unknown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nonce.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "nonce.capacity must be > 0".to_string(),
            ));
        }
        if self.nonce.timestamp_tolerance.is_zero() {
            return Err(ConfigError::InvalidValue(
                "nonce.timestamp_tolerance must be > 0".to_string(),
            ));
        }
        if self.username_prefix_len == 0 {
            return Err(ConfigError::InvalidValue(
                "username_prefix_len must be > 0".to_string(),
            ));
        }
        if self.launch_redirect.is_empty() {
            return Err(ConfigError::Missing("launch_redirect".to_string()));
        }
        if self.default_matcher.parse::<MatcherKind>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "Unknown matcher: '{}'. Must be one of {:?}",
                self.default_matcher,
                MatcherKind::names()
            )));
        }
        Ok(())
    }
}

impl SessionConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an empty cookie name, a zero
    /// or overlong lifetime, an unknown `same_site` value, or `same_site = "none"`
    /// without `secure`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.is_empty() {
            return Err(ConfigError::Missing("session.cookie_name".to_string()));
        }
        if self.lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.lifetime must be > 0".to_string(),
            ));
        }
        if self.lifetime > MAX_SESSION_LIFETIME {
            return Err(ConfigError::InvalidValue(
                "session.lifetime must not exceed 366 days".to_string(),
            ));
        }
        match self.parse_same_site() {
            None => Err(ConfigError::InvalidValue(format!(
                "Invalid same_site: '{}'. Must be strict, lax or none",
                self.same_site
            ))),
            Some(SameSite::None) if !self.secure => Err(ConfigError::InvalidValue(
                "same_site = \"none\" requires secure = true".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(LtiConfig::default().validate().is_ok());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_nonce_settings() {
        let nonce = NonceConfig::default();
        assert_eq!(nonce.timestamp_tolerance, Duration::from_secs(30));
        assert_eq!(nonce.capacity, 10);
    }

    #[test]
    fn test_zero_capacity_fails_validation() {
        let mut config = LtiConfig::default();
        config.nonce.capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_unknown_matcher_fails_validation() {
        let config = LtiConfig {
            default_matcher: "reflection.Loader".to_string(),
            ..LtiConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown matcher"));
    }

    #[test]
    fn test_session_lifetime_bounds() {
        let zero = SessionConfig {
            lifetime: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(zero.validate().is_err());

        let overlong = SessionConfig {
            lifetime: MAX_SESSION_LIFETIME + Duration::from_secs(1),
            ..SessionConfig::default()
        };
        let err = overlong.validate().unwrap_err();
        assert!(err.to_string().contains("session.lifetime"));

        let year = SessionConfig {
            lifetime: MAX_SESSION_LIFETIME,
            ..SessionConfig::default()
        };
        assert!(year.validate().is_ok());
    }

    #[test]
    fn test_same_site_none_requires_secure() {
        let config = SessionConfig {
            secure: false,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            secure: false,
            same_site: "lax".to_string(),
            ..SessionConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_cookie() {
        let config = SessionConfig::default();
        let cookie = config.build_cookie("abc123").to_string();
        assert!(cookie.contains("ltilaunch_session=abc123"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.contains("Max-Age=28800"));
    }

    #[test]
    fn test_humantime_deserialize() {
        let json = r#"{"nonce": {"timestamp_tolerance": "45s", "capacity": 20}}"#;
        let config: LtiConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.nonce.timestamp_tolerance, Duration::from_secs(45));
        assert_eq!(config.nonce.capacity, 20);
        assert_eq!(config.launch_redirect, "/");
    }
}
