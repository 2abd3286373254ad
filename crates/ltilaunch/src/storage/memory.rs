//! In-memory storage backend.
//!
//! All state lives behind a single mutex so that compound operations (nonce
//! read-modify-write, account plus identity creation) are atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    AccountStorage, ConsumerGroupStorage, ConsumerStorage, IdentityFilter, LaunchSessionStorage,
    LtiUserStorage, StorageHealth, ToolProviderStorage,
};
use crate::LaunchResult;
use crate::error::LaunchError;
use crate::nonce::NonceHistory;
use crate::types::{
    Account, ConsumerGroup, LaunchParams, LaunchSession, LtiUser, NewLtiUser, NewToolConsumer,
    ToolConsumer, ToolProvider,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    groups: BTreeMap<i64, ConsumerGroup>,
    consumers: BTreeMap<i64, ToolConsumer>,
    accounts: HashMap<Uuid, Account>,
    users: BTreeMap<i64, LtiUser>,
    sessions: HashMap<String, LaunchSession>,
    providers: BTreeMap<String, ToolProvider>,
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn identity_exists(&self, consumer_id: i64, lti_user_id: &str) -> bool {
        self.users
            .values()
            .any(|u| u.consumer_id == consumer_id && u.lti_user_id == lti_user_id)
    }

    fn insert_identity(&mut self, identity: NewLtiUser) -> LaunchResult<LtiUser> {
        if self.identity_exists(identity.consumer_id, &identity.lti_user_id) {
            return Err(LaunchError::IdentityRaceLost {
                consumer_id: identity.consumer_id,
                lti_user_id: identity.lti_user_id,
            });
        }
        let id = self.allocate_id();
        let user = identity.into_lti_user(id);
        self.users.insert(id, user.clone());
        Ok(user)
    }
}

/// Process-local storage for every launch entity.
#[derive(Debug, Default)]
pub struct InMemoryLtiStorage {
    state: Mutex<State>,
}

impl InMemoryLtiStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored identities.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.state.lock().users.len()
    }

    /// Number of stored accounts.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.state.lock().accounts.len()
    }
}

#[async_trait]
impl ConsumerStorage for InMemoryLtiStorage {
    async fn find_by_key(&self, consumer_key: &str) -> LaunchResult<Option<ToolConsumer>> {
        Ok(self
            .state
            .lock()
            .consumers
            .values()
            .find(|c| c.consumer_key == consumer_key)
            .cloned())
    }

    async fn get(&self, id: i64) -> LaunchResult<Option<ToolConsumer>> {
        Ok(self.state.lock().consumers.get(&id).cloned())
    }

    async fn list_by_group(&self, group_id: i64) -> LaunchResult<Vec<ToolConsumer>> {
        Ok(self
            .state
            .lock()
            .consumers
            .values()
            .filter(|c| c.group_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn create(&self, consumer: NewToolConsumer) -> LaunchResult<ToolConsumer> {
        let mut state = self.state.lock();
        if state
            .consumers
            .values()
            .any(|c| c.consumer_key == consumer.consumer_key)
        {
            return Err(LaunchError::storage(format!(
                "consumer key '{}' already registered",
                consumer.consumer_key
            )));
        }
        let id = state.allocate_id();
        let consumer = consumer.into_consumer(id);
        state.consumers.insert(id, consumer.clone());
        Ok(consumer)
    }

    async fn record_nonce(
        &self,
        consumer_id: i64,
        nonce: &str,
        capacity: usize,
    ) -> LaunchResult<NonceHistory> {
        let mut state = self.state.lock();
        let consumer = state
            .consumers
            .get_mut(&consumer_id)
            .ok_or_else(|| LaunchError::storage(format!("consumer {consumer_id} not found")))?;

        let previous = NonceHistory::from_vec(consumer.recent_nonces.clone());
        let mut updated = previous.clone();
        updated.push(nonce, capacity);
        consumer.recent_nonces = updated.into_vec();
        Ok(previous)
    }
}

#[async_trait]
impl ConsumerGroupStorage for InMemoryLtiStorage {
    async fn find_by_name(&self, name: &str) -> LaunchResult<Option<ConsumerGroup>> {
        Ok(self
            .state
            .lock()
            .groups
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn create(&self, name: &str) -> LaunchResult<ConsumerGroup> {
        let mut state = self.state.lock();
        if state.groups.values().any(|g| g.name == name) {
            return Err(LaunchError::storage(format!(
                "consumer group '{name}' already exists"
            )));
        }
        let id = state.allocate_id();
        let group = ConsumerGroup {
            id,
            name: name.to_string(),
        };
        state.groups.insert(id, group.clone());
        Ok(group)
    }
}

#[async_trait]
impl AccountStorage for InMemoryLtiStorage {
    async fn get(&self, id: Uuid) -> LaunchResult<Option<Account>> {
        Ok(self.state.lock().accounts.get(&id).cloned())
    }

    async fn create(&self, account: &Account) -> LaunchResult<()> {
        self.state.lock().accounts.insert(account.id, account.clone());
        Ok(())
    }
}

#[async_trait]
impl LtiUserStorage for InMemoryLtiStorage {
    async fn get(&self, id: i64) -> LaunchResult<Option<LtiUser>> {
        Ok(self.state.lock().users.get(&id).cloned())
    }

    async fn find(&self, consumer_id: i64, lti_user_id: &str) -> LaunchResult<Option<LtiUser>> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|u| u.consumer_id == consumer_id && u.lti_user_id == lti_user_id)
            .cloned())
    }

    async fn filter(
        &self,
        consumer_ids: &[i64],
        filter: &IdentityFilter,
    ) -> LaunchResult<Vec<LtiUser>> {
        // BTreeMap iteration is already ordered by id.
        Ok(self
            .state
            .lock()
            .users
            .values()
            .filter(|u| consumer_ids.contains(&u.consumer_id) && filter.matches(u))
            .cloned()
            .collect())
    }

    async fn create(&self, identity: NewLtiUser) -> LaunchResult<LtiUser> {
        self.state.lock().insert_identity(identity)
    }

    async fn create_with_account(
        &self,
        account: &Account,
        identity: NewLtiUser,
    ) -> LaunchResult<LtiUser> {
        let mut state = self.state.lock();
        let user = state.insert_identity(identity)?;
        state.accounts.insert(account.id, account.clone());
        Ok(user)
    }

    async fn record_launch(
        &self,
        id: i64,
        params: &LaunchParams,
        at: OffsetDateTime,
    ) -> LaunchResult<LtiUser> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| LaunchError::storage(format!("identity {id} not found")))?;
        user.last_launch_parameters = params.clone();
        user.last_launch_time = at;
        Ok(user.clone())
    }
}

#[async_trait]
impl LaunchSessionStorage for InMemoryLtiStorage {
    async fn create(&self, session: &LaunchSession) -> LaunchResult<()> {
        self.state
            .lock()
            .sessions
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> LaunchResult<Option<LaunchSession>> {
        Ok(self.state.lock().sessions.get(token).cloned())
    }

    async fn delete(&self, token: &str) -> LaunchResult<()> {
        self.state.lock().sessions.remove(token);
        Ok(())
    }

    async fn delete_expired(&self) -> LaunchResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock();
        let before = state.sessions.len();
        state.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl ToolProviderStorage for InMemoryLtiStorage {
    async fn find_by_name(&self, name: &str) -> LaunchResult<Option<ToolProvider>> {
        Ok(self.state.lock().providers.get(name).cloned())
    }

    async fn create(&self, provider: &ToolProvider) -> LaunchResult<()> {
        let mut state = self.state.lock();
        if state.providers.contains_key(&provider.name) {
            return Err(LaunchError::storage(format!(
                "tool provider '{}' already exists",
                provider.name
            )));
        }
        state
            .providers
            .insert(provider.name.clone(), provider.clone());
        Ok(())
    }
}

#[async_trait]
impl StorageHealth for InMemoryLtiStorage {
    async fn ping(&self) -> LaunchResult<()> {
        Ok(())
    }
}
