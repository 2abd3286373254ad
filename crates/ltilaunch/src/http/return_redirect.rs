//! `GET /lti/return`.

use axum::{
    extract::{RawQuery, State},
    response::Redirect,
};
use url::form_urlencoded;

use super::LtiState;
use super::extract::SessionAuth;
use crate::error::LaunchError;

/// Redirects (303) to the return URL of the session's last launch, with the
/// request's query appended. 401 without a session, 404 without a stored URL.
pub async fn return_handler(
    State(state): State<LtiState>,
    SessionAuth(session): SessionAuth,
    RawQuery(query): RawQuery,
) -> Result<Redirect, LaunchError> {
    let extra: Vec<(String, String)> = query
        .as_deref()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let url = state.service.return_url(&session, &extra).await?;
    tracing::debug!(identity_id = session.identity_id, target = %url, "Returning to LMS");
    Ok(Redirect::to(url.as_str()))
}
