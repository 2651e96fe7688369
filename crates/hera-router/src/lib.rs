//! Static versioned route registry for the HERA gateway.
//!
//! Every inbound request is resolved against a table of
//! [`RouteDefinition`]s registered once at startup. There is no runtime
//! endpoint discovery: anything not in the table resolves to a not-found
//! pseudo-route and is never dispatched.
//!
//! # Features
//!
//! - **O(1) literal lookup**: `(method, path)` keyed hash table
//! - **Parameterized paths**: `:name` segments compiled to anchored regexes,
//!   consulted only after the literal table misses
//! - **Deprecation**: retired routes match but are marked invalid (410)
//! - **405 detection**: registered paths hit with the wrong method report
//!   the allowed methods
//!
//! # Example
//!
//! ```rust
//! use hera_router::{RouteRegistry, MatchStatus};
//! use http::Method;
//!
//! let registry = RouteRegistry::with_defaults().unwrap();
//!
//! let m = registry.match_route(&Method::POST, "/api/v2/transactions/txn-1/approve");
//! assert!(m.is_valid);
//! assert_eq!(m.route.rpc_action.as_deref(), Some("hera_txn_approve_v2"));
//! assert_eq!(m.params.get("id"), Some("txn-1"));
//!
//! let gone = registry.match_route(&Method::POST, "/api/v1/universal");
//! assert_eq!(gone.status, MatchStatus::Deprecated);
//! ```
//!
//! # Resolution order
//!
//! ```text
//!   (method, path) ──► literal table ──hit──► route
//!                          │ miss
//!                          ▼
//!                  compiled patterns ──hit──► route + params
//!                          │ miss
//!                          ▼
//!              other methods on path? ──yes──► 405 pseudo-route
//!                          │ no
//!                          ▼
//!                  404 pseudo-route
//! ```

#![doc(html_root_url = "https://docs.rs/hera-router/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod definition;
mod error;
mod params;
mod pattern;
mod registry;
pub mod table;

pub use definition::RouteDefinition;
pub use error::RegistryError;
pub use params::Params;
pub use registry::RouteRegistry;

use hera_core::GatewayError;
use http::Method;
use std::sync::Arc;

/// Outcome of a route lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStatus {
    /// A live route matched.
    Matched,
    /// A retired route matched.
    Deprecated,
    /// Nothing is registered for the path.
    NotFound,
    /// The path is registered for other methods only.
    MethodNotAllowed {
        /// Registered methods for the path.
        allowed: Vec<Method>,
    },
}

/// A resolved route with its extracted parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route, or a pseudo-route when nothing matched.
    pub route: Arc<RouteDefinition>,
    /// Extracted path parameters.
    pub params: Params,
    /// `true` only for live matched routes.
    pub is_valid: bool,
    /// Why the match is or is not valid.
    pub status: MatchStatus,
}

impl RouteMatch {
    /// Converts an invalid match into the error returned to the client.
    ///
    /// # Example
    ///
    /// ```rust
    /// use hera_router::RouteRegistry;
    /// use http::{Method, StatusCode};
    ///
    /// let registry = RouteRegistry::with_defaults().unwrap();
    /// let err = registry
    ///     .match_route(&Method::GET, "/api/v2/nope")
    ///     .into_result(&Method::GET, "/api/v2/nope")
    ///     .unwrap_err();
    /// assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    /// ```
    pub fn into_result(self, method: &Method, path: &str) -> Result<Self, GatewayError> {
        match &self.status {
            MatchStatus::Matched => Ok(self),
            MatchStatus::Deprecated => Err(GatewayError::route_deprecated(method.as_str(), path)),
            MatchStatus::NotFound => Err(GatewayError::route_not_found(method.as_str(), path)),
            MatchStatus::MethodNotAllowed { allowed } => Err(GatewayError::method_not_allowed(
                method.as_str(),
                path,
                allowed.iter().map(ToString::to_string).collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use proptest::prelude::*;

    #[test]
    fn test_into_result_statuses() {
        let registry = RouteRegistry::with_defaults().unwrap();
        let cases = [
            (Method::GET, "/api/v2/entities", None),
            (Method::GET, "/api/v1/entities", Some(StatusCode::GONE)),
            (Method::PATCH, "/api/v2/entities", Some(StatusCode::METHOD_NOT_ALLOWED)),
            (Method::GET, "/admin", Some(StatusCode::NOT_FOUND)),
        ];
        for (method, path, expected) in cases {
            let result = registry.match_route(&method, path).into_result(&method, path);
            match expected {
                None => assert!(result.is_ok(), "{method} {path}"),
                Some(status) => assert_eq!(result.unwrap_err().status_code(), status),
            }
        }
    }

    proptest! {
        #[test]
        fn unregistered_paths_are_never_valid(segment in "[a-z]{1,12}") {
            let registry = RouteRegistry::with_defaults().unwrap();
            let path = format!("/internal/{segment}/debug");
            let m = registry.match_route(&Method::GET, &path);
            prop_assert!(!m.is_valid);
            prop_assert_eq!(m.status, MatchStatus::NotFound);
        }
    }
}
