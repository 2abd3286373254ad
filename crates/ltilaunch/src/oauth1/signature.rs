//! Signature base string and HMAC computation.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;
use sha2::Sha256;
use url::Url;

use crate::LaunchResult;
use crate::error::LaunchError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Everything except RFC 3986 unreserved characters.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes `input` the way OAuth 1.0a requires (upper-case hex,
/// unreserved characters untouched).
#[must_use]
pub fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, OAUTH_ENCODE_SET).to_string()
}

/// Supported `oauth_signature_method` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMethod {
    /// `HMAC-SHA1`, the LTI 1.x default.
    #[default]
    HmacSha1,
    /// `HMAC-SHA256`.
    HmacSha256,
}

impl SignatureMethod {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }
}

impl fmt::Display for SignatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureMethod {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HMAC-SHA1" => Ok(Self::HmacSha1),
            "HMAC-SHA256" => Ok(Self::HmacSha256),
            other => Err(LaunchError::bad_signature(format!(
                "unsupported signature method '{other}'"
            ))),
        }
    }
}

/// Normalizes a request URL into the base string URI: scheme and host lower
/// case, default port dropped, query and fragment removed.
///
/// # Errors
///
/// Returns `LaunchError::BadSignature` if the URL has no host.
pub fn base_string_uri(url: &Url) -> LaunchResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| LaunchError::bad_signature("request URL has no host"))?
        .to_ascii_lowercase();
    // `Url::port` is already `None` for the scheme's default port.
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    Ok(format!(
        "{}://{}{}{}",
        url.scheme().to_ascii_lowercase(),
        host,
        port,
        url.path()
    ))
}

/// Encodes, sorts and joins the signed parameters.
///
/// `realm` and `oauth_signature` are excluded.
#[must_use]
pub fn normalize_parameters<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut encoded: Vec<(String, String)> = params
        .into_iter()
        .filter(|(k, _)| *k != "oauth_signature" && *k != "realm")
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Builds the signature base string for `method` `url` over `params`.
///
/// # Errors
///
/// Returns `LaunchError::BadSignature` if the URL has no host.
pub fn signature_base_string<'a, I>(method: &str, url: &Url, params: I) -> LaunchResult<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    Ok(format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&base_string_uri(url)?),
        percent_encode(&normalize_parameters(params))
    ))
}

/// Signs `base_string` with the consumer secret (empty token secret) and
/// returns the base64 signature.
///
/// # Errors
///
/// Returns `LaunchError::Internal` if the HMAC key is rejected.
pub fn sign(
    method: SignatureMethod,
    consumer_secret: &str,
    base_string: &str,
) -> LaunchResult<String> {
    let key = format!("{}&", percent_encode(consumer_secret));
    let digest = match method {
        SignatureMethod::HmacSha1 => {
            let mut mac = HmacSha1::new_from_slice(key.as_bytes())
                .map_err(|e| LaunchError::internal(format!("HMAC key error: {e}")))?;
            mac.update(base_string.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
        SignatureMethod::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(key.as_bytes())
                .map_err(|e| LaunchError::internal(format!("HMAC key error: {e}")))?;
            mac.update(base_string.as_bytes());
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(BASE64.encode(digest))
}
