//! `ltilaunch` storage trait implementations.
//!
//! [`PostgresLtiStorage`] owns an `Arc<PgPool>` and delegates every trait
//! method to the borrowed per-table storage, so one
//! `Arc<PostgresLtiStorage>` can back every field of
//! [`ltilaunch::LtiStores`].

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use ltilaunch::storage::{
    AccountStorage as AccountStorageTrait, ConsumerGroupStorage as ConsumerGroupStorageTrait,
    ConsumerStorage as ConsumerStorageTrait, IdentityFilter,
    LaunchSessionStorage as LaunchSessionStorageTrait, LtiUserStorage as LtiUserStorageTrait,
    StorageHealth, ToolProviderStorage as ToolProviderStorageTrait,
};
use ltilaunch::types::{
    Account, ConsumerGroup, LaunchParams, LaunchSession, LtiUser, NewLtiUser, NewToolConsumer,
    ToolConsumer, ToolProvider,
};
use ltilaunch::{LaunchError, LaunchResult, NonceHistory};

use crate::{PostgresLtiStorage, StorageError};

/// Maps a conflict on the identity unique key to the recoverable race error.
fn map_identity_error(err: StorageError, identity: &NewLtiUser) -> LaunchError {
    if err.is_conflict() {
        LaunchError::IdentityRaceLost {
            consumer_id: identity.consumer_id,
            lti_user_id: identity.lti_user_id.clone(),
        }
    } else {
        err.into()
    }
}

#[async_trait]
impl ConsumerStorageTrait for PostgresLtiStorage {
    async fn find_by_key(&self, consumer_key: &str) -> LaunchResult<Option<ToolConsumer>> {
        Ok(self.consumers().find_by_key(consumer_key).await?)
    }

    async fn get(&self, id: i64) -> LaunchResult<Option<ToolConsumer>> {
        Ok(self.consumers().find_by_id(id).await?)
    }

    async fn list_by_group(&self, group_id: i64) -> LaunchResult<Vec<ToolConsumer>> {
        Ok(self.consumers().list_by_group(group_id).await?)
    }

    async fn create(&self, consumer: NewToolConsumer) -> LaunchResult<ToolConsumer> {
        Ok(self.consumers().create(consumer).await?)
    }

    async fn record_nonce(
        &self,
        consumer_id: i64,
        nonce: &str,
        capacity: usize,
    ) -> LaunchResult<NonceHistory> {
        Ok(self
            .consumers()
            .record_nonce(consumer_id, nonce, capacity)
            .await?)
    }
}

#[async_trait]
impl ConsumerGroupStorageTrait for PostgresLtiStorage {
    async fn find_by_name(&self, name: &str) -> LaunchResult<Option<ConsumerGroup>> {
        Ok(self.groups().find_by_name(name).await?)
    }

    async fn create(&self, name: &str) -> LaunchResult<ConsumerGroup> {
        Ok(self.groups().create(name).await?)
    }
}

#[async_trait]
impl AccountStorageTrait for PostgresLtiStorage {
    async fn get(&self, id: Uuid) -> LaunchResult<Option<Account>> {
        Ok(self.accounts().find_by_id(id).await?)
    }

    async fn create(&self, account: &Account) -> LaunchResult<()> {
        Ok(self.accounts().create(account).await?)
    }
}

#[async_trait]
impl LtiUserStorageTrait for PostgresLtiStorage {
    async fn get(&self, id: i64) -> LaunchResult<Option<LtiUser>> {
        Ok(self.lti_users().find_by_id(id).await?)
    }

    async fn find(&self, consumer_id: i64, lti_user_id: &str) -> LaunchResult<Option<LtiUser>> {
        Ok(self.lti_users().find(consumer_id, lti_user_id).await?)
    }

    async fn filter(
        &self,
        consumer_ids: &[i64],
        filter: &IdentityFilter,
    ) -> LaunchResult<Vec<LtiUser>> {
        Ok(self.lti_users().filter(consumer_ids, filter).await?)
    }

    async fn create(&self, identity: NewLtiUser) -> LaunchResult<LtiUser> {
        self.lti_users()
            .create(&identity)
            .await
            .map_err(|e| map_identity_error(e, &identity))
    }

    async fn create_with_account(
        &self,
        account: &Account,
        identity: NewLtiUser,
    ) -> LaunchResult<LtiUser> {
        self.lti_users()
            .create_with_account(account, &identity)
            .await
            .map_err(|e| map_identity_error(e, &identity))
    }

    async fn record_launch(
        &self,
        id: i64,
        params: &LaunchParams,
        at: OffsetDateTime,
    ) -> LaunchResult<LtiUser> {
        Ok(self.lti_users().record_launch(id, params, at).await?)
    }
}

#[async_trait]
impl LaunchSessionStorageTrait for PostgresLtiStorage {
    async fn create(&self, session: &LaunchSession) -> LaunchResult<()> {
        Ok(self.sessions().create(session).await?)
    }

    async fn find_by_token(&self, token: &str) -> LaunchResult<Option<LaunchSession>> {
        Ok(self.sessions().find_by_token(token).await?)
    }

    async fn delete(&self, token: &str) -> LaunchResult<()> {
        Ok(self.sessions().delete(token).await?)
    }

    async fn delete_expired(&self) -> LaunchResult<u64> {
        Ok(self.sessions().delete_expired().await?)
    }
}

#[async_trait]
impl ToolProviderStorageTrait for PostgresLtiStorage {
    async fn find_by_name(&self, name: &str) -> LaunchResult<Option<ToolProvider>> {
        Ok(self.providers().find_by_name(name).await?)
    }

    async fn create(&self, provider: &ToolProvider) -> LaunchResult<()> {
        Ok(self.providers().create(provider).await?)
    }
}

#[async_trait]
impl StorageHealth for PostgresLtiStorage {
    async fn ping(&self) -> LaunchResult<()> {
        crate::pool::test_connection(self.pool())
            .await
            .map_err(LaunchError::from)
    }
}
