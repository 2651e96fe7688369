//! The route registry.

use crate::definition::RouteDefinition;
use crate::error::RegistryError;
use crate::params::Params;
use crate::pattern::{normalize, CompiledPattern};
use crate::table;
use crate::{MatchStatus, RouteMatch};
use hera_core::{OperationClass, SecurityTier};
use http::Method;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

type RouteKey = (Method, String);

/// Static table of registered routes.
///
/// Literal routes are found with a single hash lookup keyed by method and
/// path. Parameterized routes are compiled to anchored patterns and only
/// consulted after the literal table misses. There is no fallback: a path
/// that matches nothing yields the not-found pseudo-route.
///
/// Build the registry at startup and share it behind an `Arc`; matching only
/// takes `&self`.
///
/// # Example
///
/// ```rust
/// use hera_router::{RouteDefinition, RouteRegistry, MatchStatus};
/// use http::Method;
///
/// let mut registry = RouteRegistry::new("v2");
/// registry.register(RouteDefinition::new(Method::GET, "/api/v2/entities/:id", "get_entity")).unwrap();
///
/// let m = registry.match_route(&Method::GET, "/api/v2/entities/ent-1");
/// assert!(m.is_valid);
/// assert_eq!(m.params.get("id"), Some("ent-1"));
///
/// let missing = registry.match_route(&Method::GET, "/api/v2/unknown");
/// assert!(!missing.is_valid);
/// assert_eq!(missing.status, MatchStatus::NotFound);
/// ```
#[derive(Debug, Clone)]
pub struct RouteRegistry {
    version: String,
    routes: IndexMap<RouteKey, Arc<RouteDefinition>>,
    exact: HashMap<Method, HashMap<String, usize>>,
    patterns: Vec<CompiledPattern>,
    not_found: Arc<RouteDefinition>,
    method_not_allowed: Arc<RouteDefinition>,
}

impl RouteRegistry {
    /// Creates an empty registry for the given API version.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            routes: IndexMap::new(),
            exact: HashMap::new(),
            patterns: Vec::new(),
            not_found: Arc::new(pseudo_route("not_found")),
            method_not_allowed: Arc::new(pseudo_route("method_not_allowed")),
        }
    }

    /// Creates a registry pre-populated with the default route table.
    pub fn with_defaults() -> Result<Self, RegistryError> {
        let mut registry = Self::new(table::API_VERSION);
        for route in table::default_routes() {
            registry.register(route)?;
        }
        Ok(registry)
    }

    /// Returns the API version of the table.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Registers a route.
    ///
    /// Registering an identical definition twice is a no-op and returns
    /// `Ok(false)`. A different definition under the same method and pattern
    /// is a conflict.
    pub fn register(&mut self, route: RouteDefinition) -> Result<bool, RegistryError> {
        let pattern = normalize(&route.pattern).to_string();
        let key = (route.method.clone(), pattern.clone());
        if let Some(existing) = self.routes.get(&key) {
            if **existing == route {
                return Ok(false);
            }
            return Err(RegistryError::Conflict {
                method: route.method.to_string(),
                pattern,
            });
        }

        let index = self.routes.len();
        if route.is_parameterized() {
            self.patterns.push(CompiledPattern::compile(&pattern, index)?);
        } else {
            self.exact
                .entry(route.method.clone())
                .or_default()
                .insert(pattern, index);
        }
        self.routes.insert(key, Arc::new(route));
        Ok(true)
    }

    /// Resolves a request to a route.
    ///
    /// Never fails: unknown paths resolve to the not-found pseudo-route and
    /// paths registered only for other methods resolve to the
    /// method-not-allowed pseudo-route. Both carry `is_valid = false`, as do
    /// deprecated routes.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> RouteMatch {
        let path = normalize(path);

        if let Some(index) = self.exact.get(method).and_then(|paths| paths.get(path)) {
            return self.resolved(*index, Params::new());
        }

        for pattern in &self.patterns {
            if self.route_at(pattern.index).method != *method {
                continue;
            }
            if let Some(params) = pattern.captures(path) {
                return self.resolved(pattern.index, params);
            }
        }

        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            RouteMatch {
                route: Arc::clone(&self.not_found),
                params: Params::new(),
                is_valid: false,
                status: MatchStatus::NotFound,
            }
        } else {
            RouteMatch {
                route: Arc::clone(&self.method_not_allowed),
                params: Params::new(),
                is_valid: false,
                status: MatchStatus::MethodNotAllowed { allowed },
            }
        }
    }

    /// Methods registered for `path` under any pattern, in registration order.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let path = normalize(path);
        let mut allowed: Vec<Method> = Vec::new();
        let mut push = |m: &Method| {
            if !allowed.contains(m) {
                allowed.push(m.clone());
            }
        };
        for (method, _) in self.routes.keys().filter(|(_, p)| p == path) {
            push(method);
        }
        for pattern in &self.patterns {
            if pattern.captures(path).is_some() {
                push(&self.route_at(pattern.index).method);
            }
        }
        allowed
    }

    /// Iterates over routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &RouteDefinition> {
        self.routes.values().map(AsRef::as_ref)
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn route_at(&self, index: usize) -> &Arc<RouteDefinition> {
        // indices are only ever produced by `register`
        &self.routes[index]
    }

    fn resolved(&self, index: usize, params: Params) -> RouteMatch {
        let route = Arc::clone(self.route_at(index));
        let deprecated = route.deprecated;
        RouteMatch {
            route,
            params,
            is_valid: !deprecated,
            status: if deprecated {
                MatchStatus::Deprecated
            } else {
                MatchStatus::Matched
            },
        }
    }
}

fn pseudo_route(handler: &str) -> RouteDefinition {
    RouteDefinition::new(Method::GET, "", handler)
        .class(OperationClass::Read)
        .tier(SecurityTier::Low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RouteRegistry {
        let mut r = RouteRegistry::new("v2");
        r.register(RouteDefinition::new(Method::GET, "/api/v2/entities", "list_entities"))
            .unwrap();
        r.register(RouteDefinition::new(Method::POST, "/api/v2/entities", "create_entity"))
            .unwrap();
        r.register(RouteDefinition::new(Method::GET, "/api/v2/entities/search", "search"))
            .unwrap();
        r.register(RouteDefinition::new(Method::GET, "/api/v2/entities/:id", "get_entity"))
            .unwrap();
        r.register(RouteDefinition::new(Method::PUT, "/api/v2/entities/:id", "update_entity"))
            .unwrap();
        r.register(
            RouteDefinition::new(Method::GET, "/api/v1/entities", "legacy_list").deprecated(),
        )
        .unwrap();
        r
    }

    #[test]
    fn test_exact_match() {
        let m = registry().match_route(&Method::POST, "/api/v2/entities");
        assert!(m.is_valid);
        assert_eq!(m.status, MatchStatus::Matched);
        assert_eq!(m.route.handler, "create_entity");
        assert!(m.params.is_empty());
    }

    #[test]
    fn test_exact_wins_over_pattern() {
        let m = registry().match_route(&Method::GET, "/api/v2/entities/search");
        assert_eq!(m.route.handler, "search");
    }

    #[test]
    fn test_pattern_match() {
        let m = registry().match_route(&Method::PUT, "/api/v2/entities/ent-9");
        assert!(m.is_valid);
        assert_eq!(m.route.handler, "update_entity");
        assert_eq!(m.params.get("id"), Some("ent-9"));
    }

    #[test]
    fn test_trailing_slash() {
        let m = registry().match_route(&Method::GET, "/api/v2/entities/");
        assert_eq!(m.route.handler, "list_entities");
    }

    #[test]
    fn test_not_found() {
        let m = registry().match_route(&Method::GET, "/api/v2/secret-admin");
        assert!(!m.is_valid);
        assert_eq!(m.status, MatchStatus::NotFound);
        assert_eq!(m.route.handler, "not_found");
    }

    #[test]
    fn test_method_not_allowed() {
        let m = registry().match_route(&Method::DELETE, "/api/v2/entities/ent-1");
        assert!(!m.is_valid);
        match m.status {
            MatchStatus::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec![Method::GET, Method::PUT]);
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_deprecated_matches_but_invalid() {
        let m = registry().match_route(&Method::GET, "/api/v1/entities");
        assert!(!m.is_valid);
        assert_eq!(m.status, MatchStatus::Deprecated);
        assert_eq!(m.route.handler, "legacy_list");
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut r = registry();
        let before = r.len();
        let added = r
            .register(RouteDefinition::new(Method::GET, "/api/v2/entities", "list_entities"))
            .unwrap();
        assert!(!added);
        assert_eq!(r.len(), before);
    }

    #[test]
    fn test_register_conflict() {
        let mut r = registry();
        let err = r
            .register(RouteDefinition::new(Method::GET, "/api/v2/entities", "other"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
    }

    #[test]
    fn test_defaults_load() {
        let r = RouteRegistry::with_defaults().unwrap();
        assert_eq!(r.version(), table::API_VERSION);
        assert!(r.len() > 10);
        assert!(r.match_route(&Method::POST, "/api/v2/transactions").is_valid);
    }
}
