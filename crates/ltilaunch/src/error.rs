//! Launch error types.
//!
//! Every way an LTI launch can be turned away is a distinct variant so that
//! server-side logs carry the precise reason. On the wire all rejections look
//! the same (see [`crate::http::error`]).

use std::fmt;

/// Errors that can occur while authenticating a launch or serving the
/// launch-related endpoints.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The launch payload lacks one of the required keys.
    #[error("Malformed launch: {message}")]
    MalformedLaunch {
        /// Description of what is missing.
        message: String,
    },

    /// No trusted caller is registered under the supplied consumer key.
    #[error("Unknown caller: '{consumer_key}'")]
    UnknownCaller {
        /// The consumer key supplied by the LMS.
        consumer_key: String,
    },

    /// The caller requires its instance GUID to match and it did not.
    #[error("Instance mismatch for '{consumer_key}': expected '{expected}', got '{actual}'")]
    InstanceMismatch {
        /// The consumer key supplied by the LMS.
        consumer_key: String,
        /// The registered instance GUID.
        expected: String,
        /// The instance GUID carried by the launch.
        actual: String,
    },

    /// The OAuth1 signature (or one of its protocol parameters) is invalid.
    #[error("Bad signature: {diagnostic}")]
    BadSignature {
        /// What exactly failed.
        diagnostic: String,
    },

    /// The nonce is present in the caller's recent nonce history.
    #[error("Replayed nonce: '{nonce}'")]
    ReplayedNonce {
        /// The reused nonce.
        nonce: String,
    },

    /// The request timestamp is outside the freshness window.
    #[error("Stale timestamp: {timestamp} is {skew_secs}s away from server time")]
    StaleTimestamp {
        /// The supplied `oauth_timestamp`.
        timestamp: i64,
        /// Absolute distance from server time in seconds.
        skew_secs: i64,
    },

    /// A concurrent launch inserted the same (caller, external user id) first.
    ///
    /// Recovered locally by re-reading and updating; never surfaced to the LMS.
    #[error("Identity insert lost a race for consumer {consumer_id}, user '{lti_user_id}'")]
    IdentityRaceLost {
        /// The owning consumer row id.
        consumer_id: i64,
        /// The external user identifier.
        lti_user_id: String,
    },

    /// The session's identity has no stored return URL.
    #[error("No return URL stored for identity {identity_id}")]
    NoReturnUrlStored {
        /// The identity that was looked up.
        identity_id: i64,
    },

    /// The request carries no valid launch session.
    #[error("Unauthenticated: {message}")]
    Unauthenticated {
        /// Why the session could not be resolved.
        message: String,
    },

    /// No tool provider is registered under the requested name.
    #[error("Tool provider not found: '{name}'")]
    ProviderNotFound {
        /// The requested provider slug.
        name: String,
    },

    /// An error occurred while storing or retrieving launch data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The launch configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl LaunchError {
    /// Creates a new `MalformedLaunch` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedLaunch {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownCaller` error.
    #[must_use]
    pub fn unknown_caller(consumer_key: impl Into<String>) -> Self {
        Self::UnknownCaller {
            consumer_key: consumer_key.into(),
        }
    }

    /// Creates a new `BadSignature` error.
    #[must_use]
    pub fn bad_signature(diagnostic: impl Into<String>) -> Self {
        Self::BadSignature {
            diagnostic: diagnostic.into(),
        }
    }

    /// Creates a new `Unauthenticated` error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: message.into(),
        }
    }

    /// Creates a new `ProviderNotFound` error.
    #[must_use]
    pub fn provider_not_found(name: impl Into<String>) -> Self {
        Self::ProviderNotFound { name: name.into() }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the launch was rejected (answered with 401).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MalformedLaunch { .. }
                | Self::UnknownCaller { .. }
                | Self::InstanceMismatch { .. }
                | Self::BadSignature { .. }
                | Self::ReplayedNonce { .. }
                | Self::StaleTimestamp { .. }
                | Self::Unauthenticated { .. }
        )
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.is_rejection()
            || matches!(
                self,
                Self::NoReturnUrlStored { .. } | Self::ProviderNotFound { .. }
            )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
                | Self::IdentityRaceLost { .. }
        )
    }

    /// Returns `true` if this is the recoverable identity insert race.
    #[must_use]
    pub fn is_race_lost(&self) -> bool {
        matches!(self, Self::IdentityRaceLost { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedLaunch { .. } => ErrorCategory::Validation,
            Self::UnknownCaller { .. } | Self::InstanceMismatch { .. } => ErrorCategory::Caller,
            Self::BadSignature { .. } | Self::ReplayedNonce { .. } | Self::StaleTimestamp { .. } => {
                ErrorCategory::Signature
            }
            Self::Unauthenticated { .. } => ErrorCategory::Session,
            Self::NoReturnUrlStored { .. } | Self::ProviderNotFound { .. } => {
                ErrorCategory::NotFound
            }
            Self::IdentityRaceLost { .. } | Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of launch errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Payload validation errors.
    Validation,
    /// Caller lookup and instance checks.
    Caller,
    /// Signature, nonce and timestamp checks.
    Signature,
    /// Session resolution.
    Session,
    /// Missing resources.
    NotFound,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Caller => write!(f, "caller"),
            Self::Signature => write!(f, "signature"),
            Self::Session => write!(f, "session"),
            Self::NotFound => write!(f, "not_found"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LaunchError::unknown_caller("consumer1");
        assert_eq!(err.to_string(), "Unknown caller: 'consumer1'");

        let err = LaunchError::StaleTimestamp {
            timestamp: 100,
            skew_secs: 45,
        };
        assert_eq!(
            err.to_string(),
            "Stale timestamp: 100 is 45s away from server time"
        );
    }

    #[test]
    fn test_rejections_are_client_errors() {
        let rejections = [
            LaunchError::malformed("missing user_id"),
            LaunchError::unknown_caller("nobody"),
            LaunchError::bad_signature("mismatch"),
            LaunchError::ReplayedNonce {
                nonce: "abc".into(),
            },
            LaunchError::unauthenticated("no session"),
        ];
        for err in rejections {
            assert!(err.is_rejection(), "{err} should be a rejection");
            assert!(err.is_client_error());
            assert!(!err.is_server_error());
        }
    }

    #[test]
    fn test_not_found_is_not_rejection() {
        let err = LaunchError::NoReturnUrlStored { identity_id: 1 };
        assert!(!err.is_rejection());
        assert!(err.is_client_error());
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_race_lost_is_recoverable_server_side() {
        let err = LaunchError::IdentityRaceLost {
            consumer_id: 1,
            lti_user_id: "user1".into(),
        };
        assert!(err.is_race_lost());
        assert!(err.is_server_error());
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Signature.to_string(), "signature");
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
