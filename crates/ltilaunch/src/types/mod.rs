//! Domain types for LTI launches.

pub mod account;
pub mod consumer;
pub mod identity;
pub mod params;
pub mod provider;
pub mod session;

pub use account::{Account, NewAccount, synthetic_username};
pub use consumer::{ConsumerGroup, NewToolConsumer, ToolConsumer, generate_random_string};
pub use identity::{LtiUser, NewLtiUser};
pub use params::{LaunchParams, REQUIRED_LAUNCH_KEYS};
pub use provider::{ToolProvider, Visibility};
pub use session::{LaunchSession, generate_session_token};
