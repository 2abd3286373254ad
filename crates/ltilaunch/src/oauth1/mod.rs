//! OAuth 1.0a request signing as used by LTI 1.x launches.
//!
//! LTI signs the launch form with HMAC over the RFC 5849 signature base
//! string, using the caller's shared secret and an empty token secret.
//!
//! - [`signature`] - percent encoding, base string and HMAC computation
//! - [`request`] - collection of the signed parameters from body, query and
//!   `Authorization` header
//! - [`validator`] - verification of an inbound launch for a known caller
//! - [`signer`] - the caller side, used by tests and tooling

pub mod request;
pub mod signature;
pub mod signer;
pub mod validator;

pub use request::{ProtocolParams, SignedRequest, parse_authorization_header};
pub use signature::{SignatureMethod, percent_encode, signature_base_string, sign};
pub use signer::Signer;
pub use validator::SignatureValidator;

/// The only protocol version LTI uses.
pub const OAUTH_VERSION: &str = "1.0";
