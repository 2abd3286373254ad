//! `GET /lti/session`.

use axum::{Json, extract::State};

use super::LtiState;
use super::extract::SessionAuth;
use crate::error::LaunchError;
use crate::launch::SessionContext;

/// Returns the launch context of the current session.
pub async fn session_handler(
    State(state): State<LtiState>,
    SessionAuth(session): SessionAuth,
) -> Result<Json<SessionContext>, LaunchError> {
    Ok(Json(state.service.session_context(&session).await?))
}
