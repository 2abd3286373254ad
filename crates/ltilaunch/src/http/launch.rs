//! `POST /lti/launch`.

use axum::{
    body::Bytes,
    extract::{OriginalUri, State},
    http::{HeaderMap, Method, header::AUTHORIZATION},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use url::form_urlencoded;

use super::LtiState;
use super::request_url::external_request_url;
use crate::error::LaunchError;
use crate::launch::log_launch_failure;
use crate::oauth1::{SignedRequest, parse_authorization_header};
use crate::types::LaunchParams;
use crate::types::params::CONSUMER_KEY;

/// Authenticates a signed launch form, sets the session cookie and redirects
/// (303) to the configured entry point.
pub async fn launch_handler(
    State(state): State<LtiState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, LaunchError> {
    let form: Vec<(String, String)> = form_urlencoded::parse(&body).into_owned().collect();
    let params = LaunchParams::from_pairs(form.iter().cloned());
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    let url = external_request_url(
        &headers,
        &uri,
        state.base_url.as_ref(),
        state.trust_forwarded_headers,
    )
    .inspect_err(|err| {
        let consumer_key = params.get(CONSUMER_KEY).map(str::to_string).or_else(|| {
            authorization.and_then(|h| {
                parse_authorization_header(h)
                    .into_iter()
                    .find(|(k, _)| k == CONSUMER_KEY)
                    .map(|(_, v)| v)
            })
        });
        log_launch_failure(
            err,
            consumer_key.as_deref().unwrap_or_default(),
            params.user_id().unwrap_or_default(),
        );
    })?;
    let request = SignedRequest::new(method.as_str(), url, form, authorization);

    let outcome = state.service.launch(&request, params).await?;

    let cookie = state
        .service
        .session_config()
        .build_cookie(&outcome.session.token);
    let jar = CookieJar::new().add(cookie);
    Ok((jar, Redirect::to(&state.launch_redirect)).into_response())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use axum::http::Uri;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::{LtiConfig, SessionConfig};
    use crate::launch::LaunchService;
    use crate::storage::LtiStores;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn state() -> LtiState {
        let service = LaunchService::new(
            LtiStores::in_memory(),
            &LtiConfig::default(),
            SessionConfig::default(),
        )
        .unwrap();
        LtiState {
            service,
            base_url: None,
            trust_forwarded_headers: false,
            launch_redirect: "/".into(),
        }
    }

    #[tokio::test]
    async fn test_launch_without_host_is_rejected_and_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let err = launch_handler(
            State(state()),
            Method::POST,
            OriginalUri(Uri::from_static("/lti/launch")),
            HeaderMap::new(),
            Bytes::from_static(b"oauth_consumer_key=consumer1&user_id=user1"),
        )
        .await
        .err()
        .expect("launch without Host must be rejected");
        assert!(matches!(err, LaunchError::MalformedLaunch { .. }));

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("LTI launch rejected"));
        assert!(output.contains("consumer1"));
        assert!(output.contains("user1"));
    }
}
