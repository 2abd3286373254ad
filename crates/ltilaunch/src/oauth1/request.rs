//! Collection of the parameters covered by a launch signature.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::LaunchResult;
use crate::error::LaunchError;

use super::signature::SignatureMethod;

/// An inbound request as seen by the signature check.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    method: String,
    url: Url,
    params: Vec<(String, String)>,
}

impl SignedRequest {
    /// Assembles the signed parameter list from the decoded form body, the
    /// URL's query string and an optional `Authorization: OAuth` header.
    pub fn new(
        method: impl Into<String>,
        url: Url,
        body: Vec<(String, String)>,
        authorization: Option<&str>,
    ) -> Self {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.extend(body);
        if let Some(header) = authorization {
            params.extend(
                parse_authorization_header(header)
                    .into_iter()
                    .filter(|(k, _)| k != "realm"),
            );
        }
        Self {
            method: method.into(),
            url,
            params,
        }
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Externally visible request URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// All signed parameters, duplicates preserved.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Last value supplied for `key`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Checks that every key in `keys` was supplied in the body, the query
    /// string or the `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::MalformedLaunch` naming the missing keys.
    pub fn require(&self, keys: &[&str]) -> LaunchResult<()> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| self.param(k).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LaunchError::malformed(format!(
                "missing required keys: {}",
                missing.join(", ")
            )))
        }
    }

    /// Extracts and checks the mandatory `oauth_*` protocol parameters.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::BadSignature` if a mandatory parameter is
    /// missing or the timestamp is not an integer.
    pub fn protocol_params(&self) -> LaunchResult<ProtocolParams> {
        let required = |key: &str| {
            self.param(key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| LaunchError::bad_signature(format!("missing {key}")))
        };

        let timestamp_raw = required("oauth_timestamp")?;
        let timestamp = timestamp_raw.parse::<i64>().map_err(|_| {
            LaunchError::bad_signature(format!("invalid oauth_timestamp '{timestamp_raw}'"))
        })?;

        Ok(ProtocolParams {
            consumer_key: required("oauth_consumer_key")?,
            signature: required("oauth_signature")?,
            signature_method: required("oauth_signature_method")?,
            nonce: required("oauth_nonce")?,
            timestamp,
            version: self.param("oauth_version").map(str::to_string),
        })
    }
}

/// The `oauth_*` parameters of a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolParams {
    pub consumer_key: String,
    pub signature: String,
    pub signature_method: String,
    pub nonce: String,
    pub timestamp: i64,
    pub version: Option<String>,
}

impl ProtocolParams {
    /// Parses the signature method.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError::BadSignature` for unsupported methods.
    pub fn method(&self) -> LaunchResult<SignatureMethod> {
        self.signature_method.parse()
    }
}

/// Parses an `Authorization: OAuth k="v", ...` header into decoded pairs.
///
/// Returns an empty list for any other scheme.
#[must_use]
pub fn parse_authorization_header(header: &str) -> Vec<(String, String)> {
    let header = header.trim();
    let Some((scheme, rest)) = header.split_once(char::is_whitespace) else {
        return Vec::new();
    };
    if !scheme.eq_ignore_ascii_case("oauth") {
        return Vec::new();
    }

    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
    rest.split(',')
        .filter_map(|part| {
            let (k, v) = part.trim().split_once('=')?;
            let v = v.trim().trim_matches('"');
            Some((decode(k.trim()), decode(v)))
        })
        .collect()
}
