//! # ltilaunch
//!
//! LTI 1.x tool-provider launch authentication.
//!
//! This crate provides:
//! - OAuth 1.0a signature verification of LMS launch forms
//! - Sliding-window replay protection per trusted caller
//! - Identity matching across callers of a trust group
//! - Account provisioning for first-time launches
//! - Launch sessions, return-to-LMS redirects and configuration cartridges
//!
//! ## Modules
//!
//! - [`config`] - Launch and session configuration
//! - [`oauth1`] - OAuth 1.0a signing and verification
//! - [`nonce`] - Nonce history and replay guard
//! - [`matcher`] - Pluggable identity matching strategies
//! - [`provisioning`] - Identity resolution and account creation
//! - [`launch`] - Launch orchestration and session context
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`http`] - Axum handlers and extractors

pub mod config;
pub mod error;
pub mod http;
pub mod launch;
pub mod matcher;
pub mod nonce;
pub mod oauth1;
pub mod provisioning;
pub mod storage;
pub mod types;

pub use config::{ConfigError, LtiConfig, NonceConfig, SessionConfig};
pub use error::{ErrorCategory, LaunchError};
pub use http::{LtiState, SessionAuth, lti_router};
pub use launch::{LaunchOutcome, LaunchPhase, LaunchService, SessionContext, merge_return_url};
pub use matcher::{
    CandidateSet, CanvasLoginIdMatcher, ExternalIdMatcher, IdentityMatcher, MatcherKind,
    MatcherRegistry,
};
pub use nonce::{NonceGuard, NonceHistory, NonceVerdict};
pub use oauth1::{SignatureMethod, SignatureValidator, SignedRequest, Signer};
pub use provisioning::{IdentityResolver, ProvisioningAction, ProvisioningResult};
pub use storage::{
    AccountStorage, ConsumerGroupStorage, ConsumerStorage, IdentityFilter, InMemoryLtiStorage,
    LaunchSessionStorage, LtiStores, LtiUserStorage, StorageHealth, ToolProviderStorage,
};
pub use types::{
    Account, ConsumerGroup, LaunchParams, LaunchSession, LtiUser, NewAccount, NewLtiUser,
    NewToolConsumer, ToolConsumer, ToolProvider, Visibility,
};

/// Type alias for launch results.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ltilaunch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::LaunchResult;
    pub use crate::config::{ConfigError, LtiConfig, NonceConfig, SessionConfig};
    pub use crate::error::{ErrorCategory, LaunchError};
    pub use crate::http::{LtiState, SessionAuth, lti_router};
    pub use crate::launch::{LaunchOutcome, LaunchService, SessionContext};
    pub use crate::matcher::{IdentityMatcher, MatcherKind, MatcherRegistry};
    pub use crate::oauth1::{SignedRequest, Signer};
    pub use crate::storage::{
        AccountStorage, ConsumerGroupStorage, ConsumerStorage, InMemoryLtiStorage,
        LaunchSessionStorage, LtiStores, LtiUserStorage, StorageHealth, ToolProviderStorage,
    };
    pub use crate::types::{
        Account, ConsumerGroup, LaunchParams, LaunchSession, LtiUser, NewToolConsumer,
        ToolConsumer, ToolProvider,
    };
}
