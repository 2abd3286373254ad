//! Storage traits for launch data.
//!
//! This module defines storage interfaces for:
//!
//! - Trusted callers and their nonce history
//! - Trust groups
//! - Local accounts and federated identities
//! - Launch sessions
//! - Tool provider registrations
//!
//! # Implementations
//!
//! - [`memory::InMemoryLtiStorage`] - process-local backend for development
//!   and tests
//! - `ltilaunch-postgres` - PostgreSQL storage backend

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::LaunchResult;
use crate::nonce::NonceHistory;
use crate::types::{
    Account, ConsumerGroup, LaunchParams, LaunchSession, LtiUser, NewLtiUser, NewToolConsumer,
    ToolConsumer, ToolProvider,
};

pub use memory::InMemoryLtiStorage;

/// Storage for trusted callers.
#[async_trait]
pub trait ConsumerStorage: Send + Sync {
    /// Finds a caller by its OAuth consumer key.
    async fn find_by_key(&self, consumer_key: &str) -> LaunchResult<Option<ToolConsumer>>;

    /// Finds a caller by row id.
    async fn get(&self, id: i64) -> LaunchResult<Option<ToolConsumer>>;

    /// Lists every caller in a trust group.
    async fn list_by_group(&self, group_id: i64) -> LaunchResult<Vec<ToolConsumer>>;

    /// Registers a new caller.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::Storage` if the consumer key is taken.
    async fn create(&self, consumer: NewToolConsumer) -> LaunchResult<ToolConsumer>;

    /// Atomically records `nonce` in the caller's history and returns the
    /// history as it was before the insert.
    ///
    /// Concurrent calls for the same caller must be serialized (row lock or
    /// equivalent) so that no insert is lost.
    async fn record_nonce(
        &self,
        consumer_id: i64,
        nonce: &str,
        capacity: usize,
    ) -> LaunchResult<NonceHistory>;
}

/// Storage for trust groups.
#[async_trait]
pub trait ConsumerGroupStorage: Send + Sync {
    /// Finds a group by name.
    async fn find_by_name(&self, name: &str) -> LaunchResult<Option<ConsumerGroup>>;

    /// Creates a group.
    async fn create(&self, name: &str) -> LaunchResult<ConsumerGroup>;
}

/// Storage for local accounts.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Finds an account by id.
    async fn get(&self, id: Uuid) -> LaunchResult<Option<Account>>;

    /// Persists a new account.
    async fn create(&self, account: &Account) -> LaunchResult<()>;
}

/// Filter applied to identities inside a candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityFilter {
    /// Exact match on the external user id.
    LtiUserId(String),
    /// Exact match on one key of the last launch parameters.
    LaunchParam {
        /// Parameter name.
        key: String,
        /// Expected value.
        value: String,
    },
}

impl IdentityFilter {
    /// Returns `true` if `user` passes the filter.
    #[must_use]
    pub fn matches(&self, user: &LtiUser) -> bool {
        match self {
            Self::LtiUserId(id) => user.lti_user_id == *id,
            Self::LaunchParam { key, value } => {
                user.last_launch_parameters.get(key) == Some(value.as_str())
            }
        }
    }
}

/// Storage for federated identities.
#[async_trait]
pub trait LtiUserStorage: Send + Sync {
    /// Finds an identity by row id.
    async fn get(&self, id: i64) -> LaunchResult<Option<LtiUser>>;

    /// Finds the identity for a (caller, external user id) pair.
    async fn find(&self, consumer_id: i64, lti_user_id: &str) -> LaunchResult<Option<LtiUser>>;

    /// Returns identities owned by any of `consumer_ids` that pass `filter`,
    /// ordered by ascending id.
    async fn filter(
        &self,
        consumer_ids: &[i64],
        filter: &IdentityFilter,
    ) -> LaunchResult<Vec<LtiUser>>;

    /// Creates an identity linked to an existing account.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::IdentityRaceLost` if the (caller, external user
    /// id) pair already exists.
    async fn create(&self, identity: NewLtiUser) -> LaunchResult<LtiUser>;

    /// Creates `account` and an identity linked to it in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::IdentityRaceLost` if the (caller, external user
    /// id) pair already exists; the account is not created in that case.
    async fn create_with_account(
        &self,
        account: &Account,
        identity: NewLtiUser,
    ) -> LaunchResult<LtiUser>;

    /// Replaces the stored launch parameters and timestamp.
    async fn record_launch(
        &self,
        id: i64,
        params: &LaunchParams,
        at: OffsetDateTime,
    ) -> LaunchResult<LtiUser>;
}

/// Storage for launch sessions.
#[async_trait]
pub trait LaunchSessionStorage: Send + Sync {
    /// Persists a session.
    async fn create(&self, session: &LaunchSession) -> LaunchResult<()>;

    /// Finds a session by token. Expired sessions may be returned; callers
    /// check expiry.
    async fn find_by_token(&self, token: &str) -> LaunchResult<Option<LaunchSession>>;

    /// Deletes a session.
    async fn delete(&self, token: &str) -> LaunchResult<()>;

    /// Deletes expired sessions and returns how many were removed.
    async fn delete_expired(&self) -> LaunchResult<u64>;
}

/// Storage for tool provider registrations.
#[async_trait]
pub trait ToolProviderStorage: Send + Sync {
    /// Finds a provider by slug.
    async fn find_by_name(&self, name: &str) -> LaunchResult<Option<ToolProvider>>;

    /// Registers a provider.
    async fn create(&self, provider: &ToolProvider) -> LaunchResult<()>;
}

/// Backend liveness check.
#[async_trait]
pub trait StorageHealth: Send + Sync {
    /// Returns `Ok(())` if the backend is reachable.
    async fn ping(&self) -> LaunchResult<()>;
}

/// The set of stores a launch service needs.
#[derive(Clone)]
pub struct LtiStores {
    pub consumers: Arc<dyn ConsumerStorage>,
    pub groups: Arc<dyn ConsumerGroupStorage>,
    pub accounts: Arc<dyn AccountStorage>,
    pub users: Arc<dyn LtiUserStorage>,
    pub sessions: Arc<dyn LaunchSessionStorage>,
    pub providers: Arc<dyn ToolProviderStorage>,
    pub health: Arc<dyn StorageHealth>,
}

impl LtiStores {
    /// Uses one backend for every store.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ConsumerStorage
            + ConsumerGroupStorage
            + AccountStorage
            + LtiUserStorage
            + LaunchSessionStorage
            + ToolProviderStorage
            + StorageHealth
            + 'static,
    {
        Self {
            consumers: backend.clone(),
            groups: backend.clone(),
            accounts: backend.clone(),
            users: backend.clone(),
            sessions: backend.clone(),
            providers: backend.clone(),
            health: backend,
        }
    }

    /// A fresh in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryLtiStorage::new()))
    }
}

impl std::fmt::Debug for LtiStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LtiStores").finish_non_exhaustive()
    }
}
