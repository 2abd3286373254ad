//! HTTP handlers for the LTI endpoints.
//!
//! # Available Handlers
//!
//! - [`launch_handler`] - `POST /lti/launch`, signed launch from an LMS
//! - [`return_handler`] - `GET /lti/return`, hand control back to the LMS
//! - [`config_handler`] - `GET /lti/config/{name}`, tool configuration XML
//! - [`session_handler`] - `GET /lti/session`, current launch context
//!
//! # Usage
//!
//! ```ignore
//! use ltilaunch::http::{LtiState, lti_router};
//!
//! let app = axum::Router::new().merge(lti_router(state));
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod launch;
pub mod request_url;
pub mod return_redirect;
pub mod session;

use axum::{
    Router,
    routing::{get, post},
};
use url::Url;

use crate::launch::LaunchService;

pub use config::{config_handler, render_cartridge};
pub use extract::SessionAuth;
pub use launch::launch_handler;
pub use request_url::{external_request_url, request_origin};
pub use return_redirect::return_handler;
pub use session::session_handler;

/// State shared by the LTI handlers.
#[derive(Clone, Debug)]
pub struct LtiState {
    /// Launch orchestration and session lookup.
    pub service: LaunchService,

    /// Public origin of the service. When unset it is derived from the
    /// request's `Host` header.
    pub base_url: Option<Url>,

    /// Honour `X-Forwarded-*` headers when deriving the origin.
    pub trust_forwarded_headers: bool,

    /// Where the browser goes after a successful launch.
    pub launch_redirect: String,
}

/// Routes for every LTI endpoint, bound to `state`.
pub fn lti_router(state: LtiState) -> Router {
    Router::new()
        .route("/lti/launch", post(launch_handler))
        .route("/lti/return", get(return_handler))
        .route("/lti/config/{name}", get(config_handler))
        .route("/lti/session", get(session_handler))
        .with_state(state)
}
