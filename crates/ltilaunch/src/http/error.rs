//! Error response handling for the LTI endpoints.
//!
//! Every rejection looks the same to the caller: `401` with an OAuth
//! challenge and a generic page. The precise reason only reaches the logs.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};

use crate::error::LaunchError;

/// Challenge sent with every `401`.
pub const WWW_AUTHENTICATE_CHALLENGE: &str = "OAuth realm=\"\"";

const LAUNCH_FAILED_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Launch failed</title></head>\
<body><h1>Launch failed</h1><p>The request could not be authenticated. \
Please return to your course and try again.</p></body></html>\n";

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Not found</title></head>\
<body><h1>Not found</h1></body></html>\n";

const SERVER_ERROR_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Server error</title></head>\
<body><h1>Server error</h1></body></html>\n";

impl IntoResponse for LaunchError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let mut headers = HeaderMap::new();

        let page = match status {
            StatusCode::UNAUTHORIZED => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(WWW_AUTHENTICATE_CHALLENGE),
                );
                LAUNCH_FAILED_PAGE
            }
            StatusCode::NOT_FOUND => NOT_FOUND_PAGE,
            _ => {
                tracing::error!(category = %self.category(), error = %self, "Request failed");
                SERVER_ERROR_PAGE
            }
        };

        (status, headers, Html(page)).into_response()
    }
}

/// Maps an error to its HTTP status.
#[must_use]
pub fn status_for(error: &LaunchError) -> StatusCode {
    if error.is_rejection() {
        StatusCode::UNAUTHORIZED
    } else if error.is_client_error() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_share_one_response() {
        let errors = [
            LaunchError::unknown_caller("consumer1"),
            LaunchError::bad_signature("signature mismatch (base string: POST&...)"),
            LaunchError::StaleTimestamp {
                timestamp: 1,
                skew_secs: 99,
            },
        ];
        for err in errors {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                "OAuth realm=\"\""
            );
        }
    }

    #[test]
    fn test_not_found_statuses() {
        assert_eq!(
            status_for(&LaunchError::NoReturnUrlStored { identity_id: 3 }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&LaunchError::provider_not_found("x")),
            StatusCode::NOT_FOUND
        );
        let response = LaunchError::provider_not_found("x").into_response();
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_server_errors() {
        assert_eq!(
            status_for(&LaunchError::storage("db down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
