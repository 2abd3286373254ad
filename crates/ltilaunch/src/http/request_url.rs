//! Reconstruction of the URL the LMS signed.
//!
//! Behind a proxy the URL the server sees differs from the one the LMS
//! signed, so the public origin comes from configuration, from trusted
//! `X-Forwarded-*` headers, or from `Host`, in that order.

use axum::http::{HeaderMap, Uri, header};
use url::Url;

use crate::LaunchResult;
use crate::error::LaunchError;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

fn first_header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Returns the public origin (`scheme://host[:port]/`) the request arrived at.
///
/// # Errors
///
/// Returns `MalformedLaunch` if no host can be determined.
pub fn request_origin(
    headers: &HeaderMap,
    base_url: Option<&Url>,
    trust_forwarded: bool,
) -> LaunchResult<Url> {
    if let Some(base) = base_url {
        let mut origin = base.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        return Ok(origin);
    }

    let forwarded = |name| {
        if trust_forwarded {
            first_header_value(headers, name)
        } else {
            None
        }
    };
    let scheme = forwarded(X_FORWARDED_PROTO).unwrap_or("http");
    let host = forwarded(X_FORWARDED_HOST)
        .or_else(|| first_header_value(headers, header::HOST.as_str()))
        .ok_or_else(|| LaunchError::malformed("request has no Host header"))?;

    Url::parse(&format!("{scheme}://{host}/"))
        .map_err(|e| LaunchError::malformed(format!("invalid request origin '{host}': {e}")))
}

/// Rebuilds the absolute URL of the current request.
///
/// # Errors
///
/// Returns `MalformedLaunch` if no host can be determined.
pub fn external_request_url(
    headers: &HeaderMap,
    uri: &Uri,
    base_url: Option<&Url>,
    trust_forwarded: bool,
) -> LaunchResult<Url> {
    let mut url = request_origin(headers, base_url, trust_forwarded)?;
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}
