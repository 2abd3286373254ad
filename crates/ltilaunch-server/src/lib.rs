//! LTI launch server: configuration, storage selection, bootstrap seeding
//! and router assembly around the `ltilaunch` handlers.

pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod observability;
pub mod server;

pub use bootstrap::{BootstrapReport, run_bootstrap};
pub use config::AppConfig;
pub use observability::shutdown_tracing;
pub use server::{AppState, LtiLaunchServer, ServerBuilder, build_app, open_stores};
