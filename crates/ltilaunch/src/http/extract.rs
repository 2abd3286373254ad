//! Session extractor.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::CookieJar;

use super::LtiState;
use crate::error::LaunchError;
use crate::types::LaunchSession;

/// Extractor for the launch session named by the session cookie.
///
/// Rejects with `LaunchError::Unauthenticated` (401) when the cookie is
/// missing, unknown or expired.
#[derive(Debug, Clone)]
pub struct SessionAuth(pub LaunchSession);

impl<S> FromRequestParts<S> for SessionAuth
where
    S: Send + Sync,
    LtiState: FromRef<S>,
{
    type Rejection = LaunchError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let lti_state = LtiState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie_name = &lti_state.service.session_config().cookie_name;

        let token = jar
            .get(cookie_name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| LaunchError::unauthenticated("no session cookie"))?;

        let session = lti_state.service.session(&token).await?;
        Ok(Self(session))
    }
}
