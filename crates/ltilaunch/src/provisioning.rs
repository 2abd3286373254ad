//! Resolution of a launch to a local identity and account.
//!
//! # Overview
//!
//! For an authenticated launch the resolver:
//!
//! 1. **Finds the identity** for (caller, `user_id`) and refreshes its
//!    launch parameters and timestamp
//! 2. **Matches** the launch against identities of the caller's trust group
//!    and links a new identity to the matched account
//! 3. **Provisions** a new account and identity in one atomic step
//!
//! Two concurrent first launches of the same user race on step 2 or 3. The
//! storage uniqueness constraint on (caller, `user_id`) picks a winner; the
//! loser re-reads the winning row and refreshes it instead.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::LaunchResult;
use crate::error::LaunchError;
use crate::matcher::MatcherRegistry;
use crate::storage::{ConsumerStorage, LtiUserStorage};
use crate::types::{LaunchParams, LtiUser, NewAccount, NewLtiUser, ToolConsumer, synthetic_username};

/// The action taken while resolving a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningAction {
    /// The (caller, user id) identity already existed.
    ExistingIdentity,

    /// A new identity was linked to an account matched through the trust group.
    LinkedByMatcher,

    /// A new account and identity were created.
    Created,
}

impl ProvisioningAction {
    /// Returns `true` if a new account was created.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Returns `true` if an identity was newly linked to an existing account.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::LinkedByMatcher)
    }

    /// Returns `true` if an existing identity was refreshed.
    #[must_use]
    pub fn is_existing(&self) -> bool {
        matches!(self, Self::ExistingIdentity)
    }
}

impl std::fmt::Display for ProvisioningAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExistingIdentity => write!(f, "existing_identity"),
            Self::LinkedByMatcher => write!(f, "linked_by_matcher"),
            Self::Created => write!(f, "created"),
        }
    }
}

/// Result of resolving a launch.
#[derive(Debug, Clone)]
pub struct ProvisioningResult {
    /// The identity, with the launch's parameters stored.
    pub identity: LtiUser,

    /// The action that was taken.
    pub action: ProvisioningAction,
}

/// Finds, links or creates the identity behind a launch.
#[derive(Clone)]
pub struct IdentityResolver {
    consumers: Arc<dyn ConsumerStorage>,
    users: Arc<dyn LtiUserStorage>,
    matchers: MatcherRegistry,
    username_prefix_len: usize,
}

impl IdentityResolver {
    pub fn new(
        consumers: Arc<dyn ConsumerStorage>,
        users: Arc<dyn LtiUserStorage>,
        matchers: MatcherRegistry,
        username_prefix_len: usize,
    ) -> Self {
        Self {
            consumers,
            users,
            matchers,
            username_prefix_len,
        }
    }

    /// Resolves the identity for an authenticated launch from `consumer`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLaunch` without a `user_id`, or a storage error.
    pub async fn resolve(
        &self,
        consumer: &ToolConsumer,
        params: &LaunchParams,
    ) -> LaunchResult<ProvisioningResult> {
        let lti_user_id = params
            .user_id()
            .ok_or_else(|| LaunchError::malformed("missing user_id"))?;
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = self.users.find(consumer.id, lti_user_id).await? {
            return self.refresh(existing.id, params, now).await;
        }

        let matcher = self.matchers.for_consumer(consumer);
        let matched = matcher
            .get_matching_user(self.consumers.as_ref(), self.users.as_ref(), consumer, params)
            .await?;

        let attempt = match matched {
            Some(other) => {
                tracing::info!(
                    consumer_key = %consumer.consumer_key,
                    lti_user_id = %lti_user_id,
                    account_id = %other.account_id,
                    matched_identity = other.id,
                    matcher = %matcher.kind(),
                    "Linking launch to matched account"
                );
                self.users
                    .create(self.new_identity(other.account_id, consumer, lti_user_id, params, now))
                    .await
                    .map(|identity| ProvisioningResult {
                        identity,
                        action: ProvisioningAction::LinkedByMatcher,
                    })
            }
            None => {
                let account = NewAccount {
                    username: synthetic_username(
                        consumer.instance_guid(),
                        lti_user_id,
                        self.username_prefix_len,
                    ),
                }
                .into_account();
                tracing::info!(
                    consumer_key = %consumer.consumer_key,
                    lti_user_id = %lti_user_id,
                    account_id = %account.id,
                    username = %account.username,
                    "Provisioning new account"
                );
                self.users
                    .create_with_account(
                        &account,
                        self.new_identity(account.id, consumer, lti_user_id, params, now),
                    )
                    .await
                    .map(|identity| ProvisioningResult {
                        identity,
                        action: ProvisioningAction::Created,
                    })
            }
        };

        match attempt {
            Err(err) if err.is_race_lost() => {
                tracing::info!(
                    consumer_key = %consumer.consumer_key,
                    lti_user_id = %lti_user_id,
                    "Concurrent launch created the identity first, updating it instead"
                );
                let winner = self
                    .users
                    .find(consumer.id, lti_user_id)
                    .await?
                    .ok_or_else(|| {
                        LaunchError::internal(format!(
                            "identity for consumer {} user '{lti_user_id}' vanished after conflict",
                            consumer.id
                        ))
                    })?;
                self.refresh(winner.id, params, now).await
            }
            other => other,
        }
    }

    async fn refresh(
        &self,
        identity_id: i64,
        params: &LaunchParams,
        now: OffsetDateTime,
    ) -> LaunchResult<ProvisioningResult> {
        let identity = self.users.record_launch(identity_id, params, now).await?;
        Ok(ProvisioningResult {
            identity,
            action: ProvisioningAction::ExistingIdentity,
        })
    }

    fn new_identity(
        &self,
        account_id: uuid::Uuid,
        consumer: &ToolConsumer,
        lti_user_id: &str,
        params: &LaunchParams,
        now: OffsetDateTime,
    ) -> NewLtiUser {
        NewLtiUser {
            account_id,
            consumer_id: consumer.id,
            lti_user_id: lti_user_id.to_string(),
            last_launch_parameters: params.clone(),
            last_launch_time: now,
        }
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("matchers", &self.matchers)
            .field("username_prefix_len", &self.username_prefix_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::storage::{AccountStorage, ConsumerGroupStorage, IdentityFilter, InMemoryLtiStorage};
    use crate::types::{Account, NewToolConsumer};

    async fn consumer(
        storage: &InMemoryLtiStorage,
        key: &str,
        guid: &str,
        group_id: Option<i64>,
    ) -> ToolConsumer {
        ConsumerStorage::create(
            storage,
            NewToolConsumer {
                name: key.to_string(),
                consumer_key: key.to_string(),
                consumer_secret: "secret".to_string(),
                instance_guid: Some(guid.to_string()),
                group_id,
                ..NewToolConsumer::default()
            },
        )
        .await
        .unwrap()
    }

    fn resolver(storage: Arc<InMemoryLtiStorage>) -> IdentityResolver {
        IdentityResolver::new(storage.clone(), storage, MatcherRegistry::default(), 14)
    }

    fn launch(user_id: &str, extra: &[(&str, &str)]) -> LaunchParams {
        let mut params = LaunchParams::from_pairs(extra.iter().copied());
        params.insert("user_id", user_id);
        params
    }

    #[tokio::test]
    async fn test_first_launch_creates_account() {
        let storage = Arc::new(InMemoryLtiStorage::new());
        let c = consumer(&storage, "consumer1", "0123456789abcdefXYZ", None).await;

        let result = resolver(storage.clone())
            .resolve(&c, &launch("user1", &[]))
            .await
            .unwrap();
        assert!(result.action.is_created());
        assert_eq!(result.identity.lti_user_id, "user1");

        let account = AccountStorage::get(storage.as_ref(), result.identity.account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.username, "0123456789abcduser1");
    }

    #[tokio::test]
    async fn test_repeat_launch_reuses_identity() {
        let storage = Arc::new(InMemoryLtiStorage::new());
        let c = consumer(&storage, "consumer1", "guid", None).await;
        let resolver = resolver(storage.clone());

        let first = resolver
            .resolve(&c, &launch("user1", &[("roles", "Learner")]))
            .await
            .unwrap();
        let second = resolver
            .resolve(&c, &launch("user1", &[("roles", "Instructor")]))
            .await
            .unwrap();

        assert!(second.action.is_existing());
        assert_eq!(first.identity.id, second.identity.id);
        assert_eq!(first.identity.account_id, second.identity.account_id);
        assert_eq!(
            second.identity.last_launch_parameters.get("roles"),
            Some("Instructor")
        );
        assert_eq!(storage.identity_count(), 1);
        assert_eq!(storage.account_count(), 1);
    }

    #[tokio::test]
    async fn test_group_members_share_account() {
        let storage = Arc::new(InMemoryLtiStorage::new());
        let group = ConsumerGroupStorage::create(storage.as_ref(), "g").await.unwrap();
        let a = consumer(&storage, "a", "guid-a", Some(group.id)).await;
        let b = consumer(&storage, "b", "guid-b", Some(group.id)).await;
        let resolver = resolver(storage.clone());

        let via_a = resolver.resolve(&a, &launch("user1", &[])).await.unwrap();
        let via_b = resolver.resolve(&b, &launch("user1", &[])).await.unwrap();

        assert!(via_b.action.is_linked());
        assert_ne!(via_a.identity.id, via_b.identity.id);
        assert_eq!(via_a.identity.account_id, via_b.identity.account_id);
        assert_eq!(storage.account_count(), 1);
    }

    #[tokio::test]
    async fn test_different_groups_get_different_accounts() {
        let storage = Arc::new(InMemoryLtiStorage::new());
        let g1 = ConsumerGroupStorage::create(storage.as_ref(), "g1").await.unwrap();
        let g2 = ConsumerGroupStorage::create(storage.as_ref(), "g2").await.unwrap();
        let a = consumer(&storage, "a", "guid-a", Some(g1.id)).await;
        let b = consumer(&storage, "b", "guid-b", Some(g2.id)).await;
        let resolver = resolver(storage.clone());

        let via_a = resolver.resolve(&a, &launch("user1", &[])).await.unwrap();
        let via_b = resolver.resolve(&b, &launch("user1", &[])).await.unwrap();

        assert!(via_b.action.is_created());
        assert_ne!(via_a.identity.account_id, via_b.identity.account_id);
        assert_eq!(storage.account_count(), 2);
    }

    /// Storage whose first lookup misses, simulating a concurrent insert
    /// landing between the lookup and the create.
    struct RacingUsers {
        inner: Arc<InMemoryLtiStorage>,
        missed: AtomicBool,
    }

    #[async_trait]
    impl LtiUserStorage for RacingUsers {
        async fn get(&self, id: i64) -> LaunchResult<Option<LtiUser>> {
            LtiUserStorage::get(self.inner.as_ref(), id).await
        }

        async fn find(&self, consumer_id: i64, lti_user_id: &str) -> LaunchResult<Option<LtiUser>> {
            if !self.missed.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find(consumer_id, lti_user_id).await
        }

        async fn filter(
            &self,
            _consumer_ids: &[i64],
            _filter: &IdentityFilter,
        ) -> LaunchResult<Vec<LtiUser>> {
            // Hide the winner from the matcher too.
            Ok(Vec::new())
        }

        async fn create(&self, identity: NewLtiUser) -> LaunchResult<LtiUser> {
            LtiUserStorage::create(self.inner.as_ref(), identity).await
        }

        async fn create_with_account(
            &self,
            account: &Account,
            identity: NewLtiUser,
        ) -> LaunchResult<LtiUser> {
            self.inner.create_with_account(account, identity).await
        }

        async fn record_launch(
            &self,
            id: i64,
            params: &LaunchParams,
            at: OffsetDateTime,
        ) -> LaunchResult<LtiUser> {
            self.inner.record_launch(id, params, at).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_updates_winner() {
        let storage = Arc::new(InMemoryLtiStorage::new());
        let c = consumer(&storage, "consumer1", "guid", None).await;
        let winner_account = NewAccount {
            username: "winner".into(),
        }
        .into_account();
        let winner = storage
            .create_with_account(
                &winner_account,
                NewLtiUser {
                    account_id: winner_account.id,
                    consumer_id: c.id,
                    lti_user_id: "user1".into(),
                    last_launch_parameters: LaunchParams::new(),
                    last_launch_time: OffsetDateTime::now_utc(),
                },
            )
            .await
            .unwrap();

        let users = Arc::new(RacingUsers {
            inner: storage.clone(),
            missed: AtomicBool::new(false),
        });
        let resolver =
            IdentityResolver::new(storage.clone(), users, MatcherRegistry::default(), 14);

        let result = resolver
            .resolve(&c, &launch("user1", &[("context_id", "c1")]))
            .await
            .unwrap();
        assert!(result.action.is_existing());
        assert_eq!(result.identity.id, winner.id);
        assert_eq!(result.identity.account_id, winner_account.id);
        assert_eq!(
            result.identity.last_launch_parameters.get("context_id"),
            Some("c1")
        );
        assert_eq!(storage.identity_count(), 1);
        assert_eq!(storage.account_count(), 1);
    }
}
