//! Caller-side signing of launch forms.

use time::OffsetDateTime;
use url::Url;

use super::OAUTH_VERSION;
use super::signature::{SignatureMethod, sign, signature_base_string};
use crate::LaunchResult;
use crate::types::generate_session_token;

/// Signs launch forms the way an LMS does.
#[derive(Debug, Clone)]
pub struct Signer {
    consumer_key: String,
    consumer_secret: String,
    method: SignatureMethod,
}

impl Signer {
    /// A `HMAC-SHA1` signer for the given credentials.
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            method: SignatureMethod::default(),
        }
    }

    /// Uses `method` instead of `HMAC-SHA1`.
    #[must_use]
    pub fn with_method(mut self, method: SignatureMethod) -> Self {
        self.method = method;
        self
    }

    /// Signs a `POST` of `params` to `url` with a random nonce and the
    /// current time. Returns the form to submit, `oauth_*` fields included.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` has no host.
    pub fn sign_form(
        &self,
        url: &Url,
        params: &[(String, String)],
    ) -> LaunchResult<Vec<(String, String)>> {
        self.sign_form_with(
            url,
            params,
            &generate_session_token(),
            OffsetDateTime::now_utc().unix_timestamp(),
        )
    }

    /// Same as [`Self::sign_form`] with an explicit nonce and timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` has no host.
    pub fn sign_form_with(
        &self,
        url: &Url,
        params: &[(String, String)],
        nonce: &str,
        timestamp: i64,
    ) -> LaunchResult<Vec<(String, String)>> {
        let mut form: Vec<(String, String)> = params
            .iter()
            .filter(|(k, _)| !k.starts_with("oauth_"))
            .cloned()
            .collect();
        form.extend([
            ("oauth_consumer_key".to_string(), self.consumer_key.clone()),
            (
                "oauth_signature_method".to_string(),
                self.method.as_str().to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_version".to_string(), OAUTH_VERSION.to_string()),
        ]);

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let base = signature_base_string(
            "POST",
            url,
            query
                .iter()
                .chain(form.iter())
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )?;
        let signature = sign(self.method, &self.consumer_secret, &base)?;
        form.push(("oauth_signature".to_string(), signature));
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_form_adds_protocol_params() {
        let signer = Signer::new("consumer1", "secret");
        let url = Url::parse("http://tool.example/lti/launch").unwrap();
        let form = signer
            .sign_form_with(&url, &[("user_id".into(), "user1".into())], "n1", 1_000)
            .unwrap();
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("user_id"), Some("user1"));
        assert_eq!(get("oauth_consumer_key"), Some("consumer1"));
        assert_eq!(get("oauth_signature_method"), Some("HMAC-SHA1"));
        assert_eq!(get("oauth_nonce"), Some("n1"));
        assert_eq!(get("oauth_timestamp"), Some("1000"));
        assert!(get("oauth_signature").is_some());
    }

    #[test]
    fn test_same_inputs_same_signature() {
        let signer = Signer::new("k", "s");
        let url = Url::parse("http://tool.example/launch").unwrap();
        let a = signer.sign_form_with(&url, &[], "n", 1).unwrap();
        let b = signer.sign_form_with(&url, &[], "n", 1).unwrap();
        assert_eq!(a, b);
        let c = signer.sign_form_with(&url, &[], "m", 1).unwrap();
        assert_ne!(a.last(), c.last());
    }
}
