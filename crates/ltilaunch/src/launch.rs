//! Launch orchestration.
//!
//! A launch moves through `Received -> Validating -> Authenticated` or ends
//! in `Rejected`. Only the terminal states are observable from outside:
//! [`LaunchService::launch`] returns either a [`LaunchOutcome`] carrying the
//! new session or the rejection reason.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::LaunchResult;
use crate::config::{LtiConfig, SessionConfig};
use crate::error::LaunchError;
use crate::matcher::MatcherRegistry;
use crate::nonce::NonceGuard;
use crate::oauth1::{SignatureValidator, SignedRequest};
use crate::provisioning::{IdentityResolver, ProvisioningAction};
use crate::storage::LtiStores;
use crate::types::params::{CONSUMER_KEY, USER_ID};
use crate::types::{
    LaunchParams, LaunchSession, LtiUser, REQUIRED_LAUNCH_KEYS, ToolConsumer, ToolProvider,
};

/// Phases of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    Received,
    Validating,
    Authenticated,
    Rejected,
}

impl fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Validating => write!(f, "validating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A successful launch.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub consumer: ToolConsumer,
    pub identity: LtiUser,
    pub action: ProvisioningAction,
    pub session: LaunchSession,
}

impl LaunchOutcome {
    /// Always [`LaunchPhase::Authenticated`].
    #[must_use]
    pub fn phase(&self) -> LaunchPhase {
        LaunchPhase::Authenticated
    }
}

/// The launch context of the current session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub account_id: Uuid,
    pub username: String,
    pub person_name: String,
    pub source_lms: String,
    pub lti_user_id: String,
    pub course_id: Option<String>,
    pub roles: Vec<String>,
    pub is_instructor: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_launch_time: OffsetDateTime,
}

/// Authenticates launches, establishes sessions and serves the per-session
/// launch context.
#[derive(Clone)]
pub struct LaunchService {
    stores: LtiStores,
    validator: SignatureValidator,
    resolver: IdentityResolver,
    session_config: SessionConfig,
}

impl LaunchService {
    /// Wires a service over `stores`.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::Configuration` if the default matcher is unknown.
    pub fn new(stores: LtiStores, lti: &LtiConfig, session: SessionConfig) -> LaunchResult<Self> {
        let matchers = MatcherRegistry::from_default_name(&lti.default_matcher)
            .map_err(LaunchError::configuration)?;
        let guard = NonceGuard::new(stores.consumers.clone(), &lti.nonce);
        let resolver = IdentityResolver::new(
            stores.consumers.clone(),
            stores.users.clone(),
            matchers,
            lti.username_prefix_len,
        );
        Ok(Self {
            validator: SignatureValidator::new(guard),
            resolver,
            session_config: session,
            stores,
        })
    }

    /// The backing stores.
    #[must_use]
    pub fn stores(&self) -> &LtiStores {
        &self.stores
    }

    /// Session cookie settings.
    #[must_use]
    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Authenticates a launch and establishes a session.
    ///
    /// `params` is the launch form as posted; `request` carries everything
    /// the signature covers.
    ///
    /// # Errors
    ///
    /// Rejections (`MalformedLaunch`, `UnknownCaller`, `InstanceMismatch`,
    /// `BadSignature`, `ReplayedNonce`, `StaleTimestamp`) are logged here and
    /// returned; storage failures are returned as is.
    pub async fn launch(
        &self,
        request: &SignedRequest,
        params: LaunchParams,
    ) -> LaunchResult<LaunchOutcome> {
        match self.authenticate(request, params).await {
            Ok(outcome) => {
                tracing::info!(
                    consumer_key = %outcome.consumer.consumer_key,
                    lti_user_id = %outcome.identity.lti_user_id,
                    account_id = %outcome.identity.account_id,
                    action = %outcome.action,
                    phase = %outcome.phase(),
                    "LTI launch authenticated"
                );
                Ok(outcome)
            }
            Err(err) => {
                log_launch_failure(
                    &err,
                    request.param(CONSUMER_KEY).unwrap_or_default(),
                    request.param(USER_ID).unwrap_or_default(),
                );
                Err(err)
            }
        }
    }

    async fn authenticate(
        &self,
        request: &SignedRequest,
        params: LaunchParams,
    ) -> LaunchResult<LaunchOutcome> {
        tracing::debug!(phase = %LaunchPhase::Received, "LTI launch received");
        request.require(&REQUIRED_LAUNCH_KEYS)?;
        let consumer_key = request.param(CONSUMER_KEY).unwrap_or_default();

        tracing::debug!(
            phase = %LaunchPhase::Validating,
            consumer_key = %consumer_key,
            "Validating LTI launch"
        );
        let consumer = self
            .stores
            .consumers
            .find_by_key(consumer_key)
            .await?
            .ok_or_else(|| LaunchError::unknown_caller(consumer_key))?;

        if !consumer.accepts_instance(params.instance_guid()) {
            return Err(LaunchError::InstanceMismatch {
                consumer_key: consumer.consumer_key.clone(),
                expected: consumer.instance_guid().to_string(),
                actual: params.instance_guid().to_string(),
            });
        }

        self.validator.validate(&consumer, request).await?;

        let resolved = self.resolver.resolve(&consumer, &params).await?;
        let session = LaunchSession::new(
            resolved.identity.account_id,
            resolved.identity.id,
            self.session_config.lifetime,
        );
        self.prune_expired_sessions().await;
        self.stores.sessions.create(&session).await?;

        Ok(LaunchOutcome {
            consumer,
            identity: resolved.identity,
            action: resolved.action,
            session,
        })
    }

    /// Looks up a live session by token.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for unknown or expired tokens.
    pub async fn session(&self, token: &str) -> LaunchResult<LaunchSession> {
        let session = self
            .stores
            .sessions
            .find_by_token(token)
            .await?
            .ok_or_else(|| LaunchError::unauthenticated("unknown session"))?;
        if session.is_expired() {
            self.stores.sessions.delete(token).await?;
            return Err(LaunchError::unauthenticated("session expired"));
        }
        Ok(session)
    }

    /// Drops expired sessions. A failure is logged and does not stop the
    /// launch.
    async fn prune_expired_sessions(&self) {
        match self.stores.sessions.delete_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "Pruned expired launch sessions"),
            Err(e) => tracing::warn!(error = %e, "Pruning expired launch sessions failed"),
        }
    }

    async fn session_identity(&self, session: &LaunchSession) -> LaunchResult<LtiUser> {
        self.stores
            .users
            .get(session.identity_id)
            .await?
            .ok_or_else(|| LaunchError::unauthenticated("session identity no longer exists"))
    }

    /// Builds the URL that hands control back to the LMS for `session`,
    /// appending `extra_query` after the stored URL's own query.
    ///
    /// # Errors
    ///
    /// Returns `NoReturnUrlStored` if the last launch carried no usable
    /// return URL.
    pub async fn return_url(
        &self,
        session: &LaunchSession,
        extra_query: &[(String, String)],
    ) -> LaunchResult<Url> {
        let identity = self.session_identity(session).await?;
        let stored = identity
            .last_launch_parameters
            .return_url()
            .ok_or(LaunchError::NoReturnUrlStored {
                identity_id: identity.id,
            })?;
        merge_return_url(stored, extra_query).map_err(|e| {
            tracing::warn!(
                identity_id = identity.id,
                return_url = %stored,
                error = %e,
                "Stored return URL is not an absolute URL"
            );
            LaunchError::NoReturnUrlStored {
                identity_id: identity.id,
            }
        })
    }

    /// Describes the launch behind `session`.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` if the identity or account is gone.
    pub async fn session_context(&self, session: &LaunchSession) -> LaunchResult<SessionContext> {
        let identity = self.session_identity(session).await?;
        let account = self
            .stores
            .accounts
            .get(identity.account_id)
            .await?
            .ok_or_else(|| LaunchError::unauthenticated("session account no longer exists"))?;
        let source_lms = self
            .stores
            .consumers
            .get(identity.consumer_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_default();

        let params = &identity.last_launch_parameters;
        Ok(SessionContext {
            account_id: account.id,
            person_name: params
                .person_name()
                .map_or_else(|| account.username.clone(), str::to_string),
            username: account.username,
            source_lms,
            lti_user_id: identity.lti_user_id.clone(),
            course_id: params.course_id().map(str::to_string),
            roles: params.roles().into_iter().map(str::to_string).collect(),
            is_instructor: params.is_instructor(),
            last_launch_time: identity.last_launch_time,
        })
    }

    /// Finds a tool provider registration by slug.
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotFound` for unknown names.
    pub async fn tool_provider(&self, name: &str) -> LaunchResult<ToolProvider> {
        self.stores
            .providers
            .find_by_name(name)
            .await?
            .ok_or_else(|| LaunchError::provider_not_found(name))
    }
}

/// Logs a launch that did not authenticate. Rejections go to `warn` with
/// the caller's key and external user id; infrastructure failures to `error`.
pub(crate) fn log_launch_failure(err: &LaunchError, consumer_key: &str, lti_user_id: &str) {
    if err.is_rejection() {
        tracing::warn!(
            consumer_key = consumer_key,
            lti_user_id = lti_user_id,
            category = %err.category(),
            diagnostic = %err,
            phase = %LaunchPhase::Rejected,
            "LTI launch rejected"
        );
    } else {
        tracing::error!(consumer_key = consumer_key, error = %err, "LTI launch failed");
    }
}

impl fmt::Debug for LaunchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchService")
            .field("validator", &self.validator)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Appends `extra` to the query of `stored`, keeping the stored pairs first.
/// Duplicates and blank values are preserved; the fragment is kept.
///
/// # Errors
///
/// Returns the parse error if `stored` is not an absolute URL.
pub fn merge_return_url(stored: &str, extra: &[(String, String)]) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(stored)?;
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.set_query(None);
    if !existing.is_empty() || !extra.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(existing.iter().chain(extra.iter()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::oauth1::{Signer, percent_encode};
    use crate::storage::{ConsumerStorage, InMemoryLtiStorage, LaunchSessionStorage};
    use crate::types::NewToolConsumer;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_return_url() {
        let url = merge_return_url("http://example.com/x?a=1", &pairs(&[("b", "2")])).unwrap();
        assert_eq!(url.as_str(), "http://example.com/x?a=1&b=2");
    }

    #[test]
    fn test_merge_return_url_keeps_duplicates_blanks_and_fragment() {
        let url = merge_return_url(
            "https://lms.example/courses/1?a=1&a=2#done",
            &pairs(&[("a", "3"), ("empty", "")]),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://lms.example/courses/1?a=1&a=2&a=3&empty=#done"
        );
    }

    #[test]
    fn test_merge_return_url_no_query() {
        let url = merge_return_url("http://example.com/x", &[]).unwrap();
        assert_eq!(url.as_str(), "http://example.com/x");
        assert!(merge_return_url("/relative", &[]).is_err());
    }

    struct Harness {
        storage: Arc<InMemoryLtiStorage>,
        service: LaunchService,
    }

    impl Harness {
        async fn new(match_guid: bool) -> Self {
            let storage = Arc::new(InMemoryLtiStorage::new());
            ConsumerStorage::create(
                storage.as_ref(),
                NewToolConsumer {
                    name: "Test LMS".into(),
                    consumer_key: "consumer1".into(),
                    consumer_secret: "secret".into(),
                    instance_guid: Some("lms-guid".into()),
                    match_guid_and_consumer: match_guid,
                    ..NewToolConsumer::default()
                },
            )
            .await
            .unwrap();
            let service = LaunchService::new(
                LtiStores::from_backend(storage.clone()),
                &LtiConfig::default(),
                SessionConfig::default(),
            )
            .unwrap();
            Self { storage, service }
        }

        async fn launch(
            &self,
            secret: &str,
            fields: &[(&str, &str)],
        ) -> LaunchResult<LaunchOutcome> {
            let url = Url::parse("http://tool.example/lti/launch").unwrap();
            let form = Signer::new("consumer1", secret)
                .sign_form(&url, &pairs(fields))
                .unwrap();
            let params = LaunchParams::from_pairs(form.clone());
            let request = SignedRequest::new("POST", url, form, None);
            self.service.launch(&request, params).await
        }

        /// Signs like [`Harness::launch`] but moves every `oauth_*` field into
        /// an `Authorization: OAuth` header.
        async fn launch_with_header(
            &self,
            fields: &[(&str, &str)],
        ) -> LaunchResult<LaunchOutcome> {
            let url = Url::parse("http://tool.example/lti/launch").unwrap();
            let form = Signer::new("consumer1", "secret")
                .sign_form(&url, &pairs(fields))
                .unwrap();
            let (oauth, body): (Vec<_>, Vec<_>) =
                form.into_iter().partition(|(k, _)| k.starts_with("oauth_"));
            let header = std::iter::once(r#"OAuth realm="""#.to_string())
                .chain(
                    oauth
                        .iter()
                        .map(|(k, v)| format!(r#"{k}="{}""#, percent_encode(v))),
                )
                .collect::<Vec<_>>()
                .join(", ");

            let params = LaunchParams::from_pairs(body.clone());
            let request = SignedRequest::new("POST", url, body, Some(&header));
            self.service.launch(&request, params).await
        }
    }

    #[tokio::test]
    async fn test_launch_with_authorization_header() {
        let h = Harness::new(false).await;
        let outcome = h
            .launch_with_header(&[("user_id", "user1"), ("roles", "Learner")])
            .await
            .unwrap();
        assert_eq!(outcome.consumer.consumer_key, "consumer1");
        assert_eq!(outcome.identity.lti_user_id, "user1");
        assert_eq!(h.storage.identity_count(), 1);
    }

    #[tokio::test]
    async fn test_header_launch_still_requires_user_id() {
        let h = Harness::new(false).await;
        let err = h
            .launch_with_header(&[("roles", "Learner")])
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::MalformedLaunch { .. }));
        assert!(err.to_string().contains("user_id"));
    }

    #[tokio::test]
    async fn test_launch_authenticates_and_creates_session() {
        let h = Harness::new(true).await;
        let outcome = h
            .launch(
                "secret",
                &[
                    ("user_id", "user1"),
                    ("tool_consumer_instance_guid", "lms-guid"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.phase(), LaunchPhase::Authenticated);
        assert!(outcome.action.is_created());
        assert_eq!(
            outcome.identity.last_launch_parameters.get("oauth_consumer_key"),
            Some("consumer1")
        );

        let session = h.service.session(&outcome.session.token).await.unwrap();
        assert_eq!(session.identity_id, outcome.identity.id);
    }

    #[tokio::test]
    async fn test_second_launch_reuses_account() {
        let h = Harness::new(false).await;
        let first = h.launch("secret", &[("user_id", "user1")]).await.unwrap();
        let second = h.launch("secret", &[("user_id", "user1")]).await.unwrap();
        assert_eq!(first.identity.account_id, second.identity.account_id);
        assert_ne!(first.session.token, second.session.token);
        assert_eq!(h.storage.account_count(), 1);
        assert_eq!(h.storage.identity_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_user_id_is_malformed() {
        let h = Harness::new(false).await;
        let err = h.launch("secret", &[("roles", "Learner")]).await.unwrap_err();
        assert!(matches!(err, LaunchError::MalformedLaunch { .. }));
        assert_eq!(h.storage.identity_count(), 0);
    }

    #[tokio::test]
    async fn test_instance_mismatch_toggle() {
        let strict = Harness::new(true).await;
        let err = strict
            .launch(
                "secret",
                &[("user_id", "user1"), ("tool_consumer_instance_guid", "other")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InstanceMismatch { .. }));

        let lenient = Harness::new(false).await;
        lenient
            .launch(
                "secret",
                &[("user_id", "user1"), ("tool_consumer_instance_guid", "other")],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_secret_creates_nothing() {
        let h = Harness::new(false).await;
        let err = h.launch("wrong", &[("user_id", "user1")]).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(h.storage.identity_count(), 0);
    }

    #[tokio::test]
    async fn test_session_context() {
        let h = Harness::new(false).await;
        let outcome = h
            .launch(
                "secret",
                &[
                    ("user_id", "user1"),
                    ("lis_person_name_full", "Ada Lovelace"),
                    ("custom_canvas_course_id", "42"),
                    ("roles", "Instructor"),
                ],
            )
            .await
            .unwrap();
        let ctx = h.service.session_context(&outcome.session).await.unwrap();
        assert_eq!(ctx.person_name, "Ada Lovelace");
        assert_eq!(ctx.source_lms, "Test LMS");
        assert_eq!(ctx.course_id.as_deref(), Some("42"));
        assert!(ctx.is_instructor);
        assert_eq!(ctx.lti_user_id, "user1");
    }

    #[tokio::test]
    async fn test_return_url_requires_stored_value() {
        let h = Harness::new(false).await;
        let outcome = h.launch("secret", &[("user_id", "user1")]).await.unwrap();
        let err = h
            .service
            .return_url(&outcome.session, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::NoReturnUrlStored { .. }));

        let outcome = h
            .launch(
                "secret",
                &[
                    ("user_id", "user1"),
                    ("launch_presentation_return_url", "http://example.com/x?a=1"),
                ],
            )
            .await
            .unwrap();
        let url = h
            .service
            .return_url(&outcome.session, &pairs(&[("b", "2")]))
            .await
            .unwrap();
        assert_eq!(url.as_str(), "http://example.com/x?a=1&b=2");
    }

    #[tokio::test]
    async fn test_launch_prunes_expired_sessions() {
        let h = Harness::new(false).await;
        let mut stale =
            LaunchSession::new(Uuid::new_v4(), 1, std::time::Duration::from_secs(60));
        stale.expires_at = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        LaunchSessionStorage::create(h.storage.as_ref(), &stale)
            .await
            .unwrap();

        let outcome = h.launch("secret", &[("user_id", "user1")]).await.unwrap();
        let found = LaunchSessionStorage::find_by_token(h.storage.as_ref(), &stale.token)
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(h.service.session(&outcome.session.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session_is_unauthenticated() {
        let h = Harness::new(false).await;
        let err = h.service.session("nope").await.unwrap_err();
        assert!(matches!(err, LaunchError::Unauthenticated { .. }));
    }
}
