//! Verification of signed launches.

use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use super::OAUTH_VERSION;
use super::request::SignedRequest;
use super::signature::{sign, signature_base_string};
use crate::LaunchResult;
use crate::error::LaunchError;
use crate::nonce::NonceGuard;
use crate::types::ToolConsumer;

/// Verifies launch signatures against a caller's shared secret.
///
/// The nonce is recorded on every attempt that carries one, whatever the
/// outcome of the other checks.
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    nonces: NonceGuard,
}

impl SignatureValidator {
    pub fn new(nonces: NonceGuard) -> Self {
        Self { nonces }
    }

    /// Validates `request` for `consumer` against the current time.
    ///
    /// # Errors
    ///
    /// Returns `BadSignature`, `ReplayedNonce` or `StaleTimestamp` carrying
    /// the diagnostic. Nonce and timestamp failures take precedence.
    pub async fn validate(
        &self,
        consumer: &ToolConsumer,
        request: &SignedRequest,
    ) -> LaunchResult<()> {
        self.validate_at(consumer, request, OffsetDateTime::now_utc())
            .await
    }

    /// Same as [`Self::validate`] with an explicit clock.
    pub async fn validate_at(
        &self,
        consumer: &ToolConsumer,
        request: &SignedRequest,
        now: OffsetDateTime,
    ) -> LaunchResult<()> {
        let protocol = request.protocol_params()?;

        let verdict = self
            .nonces
            .record_and_check_at(consumer, &protocol.nonce, protocol.timestamp, now)
            .await?;
        let signature_check = Self::check_signature(consumer, request, &protocol);

        verdict.into_result(&protocol.nonce, protocol.timestamp)?;
        signature_check
    }

    fn check_signature(
        consumer: &ToolConsumer,
        request: &SignedRequest,
        protocol: &super::ProtocolParams,
    ) -> LaunchResult<()> {
        if let Some(version) = protocol
            .version
            .as_deref()
            .filter(|v| *v != OAUTH_VERSION)
        {
            return Err(LaunchError::bad_signature(format!(
                "unsupported oauth_version '{version}'"
            )));
        }
        if protocol.consumer_key != consumer.consumer_key {
            return Err(LaunchError::bad_signature("consumer key mismatch"));
        }

        let method = protocol.method()?;
        let base = signature_base_string(request.method(), request.url(), request.params())?;
        let expected = sign(method, &consumer.consumer_secret, &base)?;

        if bool::from(expected.as_bytes().ct_eq(protocol.signature.as_bytes())) {
            Ok(())
        } else {
            Err(LaunchError::bad_signature(format!(
                "signature mismatch (base string: {base})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use url::Url;

    use super::*;
    use crate::config::NonceConfig;
    use crate::oauth1::Signer;
    use crate::storage::{ConsumerStorage, InMemoryLtiStorage};
    use crate::types::NewToolConsumer;

    async fn setup() -> (SignatureValidator, ToolConsumer) {
        let storage = Arc::new(InMemoryLtiStorage::new());
        let consumer = ConsumerStorage::create(
            storage.as_ref(),
            NewToolConsumer {
                name: "lms".into(),
                consumer_key: "consumer1".into(),
                consumer_secret: "secret".into(),
                ..NewToolConsumer::default()
            },
        )
        .await
        .unwrap();
        let guard = NonceGuard::new(storage, &NonceConfig::default());
        (SignatureValidator::new(guard), consumer)
    }

    fn launch_url() -> Url {
        Url::parse("http://tool.example/lti/launch").unwrap()
    }

    fn signed(secret: &str, nonce: &str, ts: i64) -> SignedRequest {
        let form = Signer::new("consumer1", secret)
            .sign_form_with(
                &launch_url(),
                &[
                    ("user_id".into(), "user1".into()),
                    ("roles".into(), "Learner".into()),
                ],
                nonce,
                ts,
            )
            .unwrap();
        SignedRequest::new("POST", launch_url(), form, None)
    }

    #[tokio::test]
    async fn test_valid_signature() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let request = signed("secret", "n1", now.unix_timestamp());
        validator.validate_at(&consumer, &request, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let request = signed("wrong", "n1", now.unix_timestamp());
        let err = validator.validate_at(&consumer, &request, now).await.unwrap_err();
        assert!(matches!(err, LaunchError::BadSignature { .. }));
    }

    #[tokio::test]
    async fn test_bad_signature_still_records_nonce() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let ts = now.unix_timestamp();
        let _ = validator
            .validate_at(&consumer, &signed("wrong", "n1", ts), now)
            .await;
        let err = validator
            .validate_at(&consumer, &signed("secret", "n1", ts), now)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::ReplayedNonce { .. }));
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let request = signed("secret", "n1", now.unix_timestamp() - 120);
        let err = validator.validate_at(&consumer, &request, now).await.unwrap_err();
        assert!(matches!(err, LaunchError::StaleTimestamp { .. }));
    }

    #[tokio::test]
    async fn test_tampered_param_rejected() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let mut form = Signer::new("consumer1", "secret")
            .sign_form_with(
                &launch_url(),
                &[("user_id".into(), "user1".into())],
                "n1",
                now.unix_timestamp(),
            )
            .unwrap();
        form[0].1 = "admin".into();
        let request = SignedRequest::new("POST", launch_url(), form, None);
        assert!(validator.validate_at(&consumer, &request, now).await.is_err());
    }

    #[tokio::test]
    async fn test_header_placement_accepted() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let form = Signer::new("consumer1", "secret")
            .sign_form_with(
                &launch_url(),
                &[("user_id".into(), "user1".into())],
                "n-header",
                now.unix_timestamp(),
            )
            .unwrap();
        let (oauth, body): (Vec<_>, Vec<_>) =
            form.into_iter().partition(|(k, _)| k.starts_with("oauth_"));
        let header = format!(
            "OAuth realm=\"\", {}",
            oauth
                .iter()
                .map(|(k, v)| format!("{k}=\"{}\"", crate::oauth1::percent_encode(v)))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let request = SignedRequest::new("POST", launch_url(), body, Some(&header));
        validator.validate_at(&consumer, &request, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_sha256_accepted() {
        let (validator, consumer) = setup().await;
        let now = OffsetDateTime::now_utc();
        let form = Signer::new("consumer1", "secret")
            .with_method(crate::oauth1::SignatureMethod::HmacSha256)
            .sign_form_with(&launch_url(), &[], "n256", now.unix_timestamp())
            .unwrap();
        let request = SignedRequest::new("POST", launch_url(), form, None);
        validator.validate_at(&consumer, &request, now).await.unwrap();
    }
}
