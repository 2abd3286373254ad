//! Identity matching across callers of the same trust group.
//!
//! When a launch arrives for a (caller, external user id) pair the service
//! has not seen before, a matcher decides whether the user is already known
//! through another caller in the same trust group. A match links the new
//! identity to the existing account; no match means a fresh account.
//!
//! Matchers are a closed set of named strategies selected per caller:
//!
//! | Name              | Strategy                                              |
//! |-------------------|-------------------------------------------------------|
//! | `external_id`     | equality on `user_id`                                 |
//! | `canvas_login_id` | `custom_canvas_user_login_id`, then `lis_person_sourcedid` |
//!
//! Candidates never leave the caller's trust group. A caller without a group
//! only sees its own identities.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::LaunchResult;
use crate::storage::{ConsumerStorage, IdentityFilter, LtiUserStorage};
use crate::types::params::{CANVAS_LOGIN_ID, PERSON_SOURCEDID};
use crate::types::{LaunchParams, LtiUser, ToolConsumer};

/// Value Canvas sends when the login id variable was not substituted.
pub const CANVAS_LOGIN_ID_PLACEHOLDER: &str = "$Canvas.user.loginId";

/// Built-in matcher strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    /// Equality on the external user id.
    ExternalId,
    /// Canvas login id, falling back to the LIS source id.
    CanvasLoginId,
}

impl MatcherKind {
    /// Every built-in strategy.
    pub const ALL: [MatcherKind; 2] = [MatcherKind::ExternalId, MatcherKind::CanvasLoginId];

    /// Registry name of the strategy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalId => "external_id",
            Self::CanvasLoginId => "canvas_login_id",
        }
    }

    /// Registry names of every strategy.
    #[must_use]
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(Self::as_str).collect()
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown matcher: '{s}'"))
    }
}

/// The callers whose identities a launch may be matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    consumer_ids: Vec<i64>,
}

impl CandidateSet {
    /// Scopes candidates to `consumer`'s trust group, or to `consumer`
    /// itself when it has none.
    pub async fn for_consumer(
        consumers: &dyn ConsumerStorage,
        consumer: &ToolConsumer,
    ) -> LaunchResult<Self> {
        let mut consumer_ids = match consumer.group_id {
            Some(group_id) => consumers
                .list_by_group(group_id)
                .await?
                .into_iter()
                .map(|c| c.id)
                .collect(),
            None => Vec::new(),
        };
        if !consumer_ids.contains(&consumer.id) {
            consumer_ids.push(consumer.id);
        }
        consumer_ids.sort_unstable();
        Ok(Self { consumer_ids })
    }

    /// The callers in scope, ascending.
    #[must_use]
    pub fn consumer_ids(&self) -> &[i64] {
        &self.consumer_ids
    }

    /// Returns `true` if `consumer_id` is in scope.
    #[must_use]
    pub fn contains(&self, consumer_id: i64) -> bool {
        self.consumer_ids.contains(&consumer_id)
    }
}

/// A strategy for recognising a user already known through another caller.
#[async_trait]
pub trait IdentityMatcher: Send + Sync {
    /// Which built-in strategy this is.
    fn kind(&self) -> MatcherKind;

    /// Returns the identities in `candidates` that match `params`, ordered
    /// by ascending id.
    async fn users_for_launch(
        &self,
        users: &dyn LtiUserStorage,
        candidates: &CandidateSet,
        params: &LaunchParams,
    ) -> LaunchResult<Vec<LtiUser>>;

    /// Returns the identity whose account the launch should reuse.
    ///
    /// Several matches are not expected with consistent data; the lowest
    /// identity id wins.
    async fn get_matching_user(
        &self,
        consumers: &dyn ConsumerStorage,
        users: &dyn LtiUserStorage,
        consumer: &ToolConsumer,
        params: &LaunchParams,
    ) -> LaunchResult<Option<LtiUser>> {
        let candidates = CandidateSet::for_consumer(consumers, consumer).await?;
        let matches = self.users_for_launch(users, &candidates, params).await?;
        if matches.len() > 1 {
            tracing::warn!(
                consumer_key = %consumer.consumer_key,
                matcher = %self.kind(),
                count = matches.len(),
                "Multiple identities matched launch, using lowest id"
            );
        }
        Ok(matches.into_iter().min_by_key(|u| u.id))
    }
}

/// Matches on equality of the external user id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalIdMatcher;

#[async_trait]
impl IdentityMatcher for ExternalIdMatcher {
    fn kind(&self) -> MatcherKind {
        MatcherKind::ExternalId
    }

    async fn users_for_launch(
        &self,
        users: &dyn LtiUserStorage,
        candidates: &CandidateSet,
        params: &LaunchParams,
    ) -> LaunchResult<Vec<LtiUser>> {
        let Some(user_id) = params.user_id() else {
            return Ok(Vec::new());
        };
        users
            .filter(
                candidates.consumer_ids(),
                &IdentityFilter::LtiUserId(user_id.to_string()),
            )
            .await
    }
}

/// Matches on the Canvas login id custom field, then on the LIS source id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasLoginIdMatcher;

impl CanvasLoginIdMatcher {
    fn login_id(params: &LaunchParams) -> Option<&str> {
        params
            .get_non_empty(CANVAS_LOGIN_ID)
            .filter(|v| *v != CANVAS_LOGIN_ID_PLACEHOLDER)
    }
}

#[async_trait]
impl IdentityMatcher for CanvasLoginIdMatcher {
    fn kind(&self) -> MatcherKind {
        MatcherKind::CanvasLoginId
    }

    async fn users_for_launch(
        &self,
        users: &dyn LtiUserStorage,
        candidates: &CandidateSet,
        params: &LaunchParams,
    ) -> LaunchResult<Vec<LtiUser>> {
        if let Some(login_id) = Self::login_id(params) {
            let found = users
                .filter(
                    candidates.consumer_ids(),
                    &IdentityFilter::LaunchParam {
                        key: CANVAS_LOGIN_ID.to_string(),
                        value: login_id.to_string(),
                    },
                )
                .await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }

        match params.get_non_empty(PERSON_SOURCEDID) {
            Some(sourcedid) => {
                users
                    .filter(
                        candidates.consumer_ids(),
                        &IdentityFilter::LaunchParam {
                            key: PERSON_SOURCEDID.to_string(),
                            value: sourcedid.to_string(),
                        },
                    )
                    .await
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Dispatch table from strategy name to matcher.
#[derive(Clone)]
pub struct MatcherRegistry {
    matchers: HashMap<MatcherKind, Arc<dyn IdentityMatcher>>,
    default: MatcherKind,
}

impl MatcherRegistry {
    /// A registry with every built-in strategy and `default` as fallback.
    #[must_use]
    pub fn new(default: MatcherKind) -> Self {
        let mut matchers: HashMap<MatcherKind, Arc<dyn IdentityMatcher>> = HashMap::new();
        matchers.insert(MatcherKind::ExternalId, Arc::new(ExternalIdMatcher));
        matchers.insert(MatcherKind::CanvasLoginId, Arc::new(CanvasLoginIdMatcher));
        Self { matchers, default }
    }

    /// Builds a registry from a configured default name.
    ///
    /// # Errors
    ///
    /// Returns a message naming the unknown matcher.
    pub fn from_default_name(name: &str) -> Result<Self, String> {
        Ok(Self::new(name.parse()?))
    }

    /// The fallback strategy.
    #[must_use]
    pub fn default_kind(&self) -> MatcherKind {
        self.default
    }

    /// Returns the matcher registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: MatcherKind) -> Option<Arc<dyn IdentityMatcher>> {
        self.matchers.get(&kind).cloned()
    }

    /// Selects the matcher for `consumer`. Unknown or missing names fall back
    /// to the default.
    #[must_use]
    pub fn for_consumer(&self, consumer: &ToolConsumer) -> Arc<dyn IdentityMatcher> {
        let kind = match consumer.matcher.as_deref() {
            None | Some("") => self.default,
            Some(name) => name.parse().unwrap_or_else(|_| {
                tracing::warn!(
                    consumer_key = %consumer.consumer_key,
                    matcher = %name,
                    fallback = %self.default,
                    "Unknown matcher configured for consumer, using default"
                );
                self.default
            }),
        };
        self.get(kind)
            .or_else(|| self.get(self.default))
            .unwrap_or_else(|| Arc::new(ExternalIdMatcher))
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new(MatcherKind::ExternalId)
    }
}

impl fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherRegistry")
            .field("default", &self.default)
            .field("registered", &self.matchers.keys().collect::<Vec<_>>())
            .finish()
    }
}
