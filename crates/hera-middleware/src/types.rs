//! Request and response types used throughout the chain.
//!
//! Bodies are fully buffered before the chain runs: the admission filter
//! scans them and the idempotency manager caches them verbatim.

use bytes::Bytes;
use hera_core::{ErrorContext, GatewayError};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;

/// The HTTP request type used in the chain.
pub type Request = http::Request<Bytes>;

/// The HTTP response type used in the chain.
pub type Response = http::Response<Bytes>;

/// Content type of every JSON response the gateway produces.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Extension trait for building gateway responses.
pub trait ResponseExt {
    /// Creates a JSON response with the given status.
    fn json(status: StatusCode, body: Bytes) -> Response;

    /// Creates the error envelope response for `error`, including any extra
    /// headers the error carries.
    fn from_error(error: &GatewayError, context: &ErrorContext) -> Response;
}

impl ResponseExt for Response {
    fn json(status: StatusCode, body: Bytes) -> Response {
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }

    fn from_error(error: &GatewayError, context: &ErrorContext) -> Response {
        let mut response = Self::json(error.status_code(), error.to_envelope(context).to_bytes());
        for (name, value) in error.headers() {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response() {
        let response = Response::json(StatusCode::CREATED, Bytes::from_static(b"{}"));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
    }

    #[test]
    fn test_error_response_carries_headers() {
        let error = GatewayError::rate_limited(60, 1_700_000_060, 12);
        let context = ErrorContext::new("req-1", "/api/v2/entities");
        let response = Response::from_error(&error, &context);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "12");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"]["category"], "RATE_LIMIT");
        assert_eq!(body["error"]["context"]["request_id"], "req-1");
    }
}
