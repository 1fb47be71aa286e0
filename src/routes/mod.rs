/// Route Table Module
///
/// Holds the registered routes and answers "which route serves this
/// (method, path)". The matching itself is delegated to the `matchit` radix
/// tree; this module owns registration rules, placeholder types and reverse
/// path generation.
pub mod pattern;
pub mod policy;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::http::Method;
use serde_json::{Map, Value};

use crate::{error::ConfigError, handlers::Handler};
pub use pattern::{ParamKind, Pattern};
pub use policy::{Access, AccessPolicy, authorize};

/// Named parameters extracted from the request path.
pub type RouteParams = Map<String, Value>;

/// Target
///
/// What a route dispatches to: a handler invoked with the route context, or a
/// logical view name rendered through the view pipeline.
#[derive(Clone)]
pub enum Target {
    Handler(Arc<dyn Handler>),
    View(String),
}

impl Target {
    pub fn handler<H: Handler>(handler: H) -> Self {
        Self::Handler(Arc::new(handler))
    }

    pub fn view(name: impl Into<String>) -> Self {
        Self::View(name.into())
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler(..)"),
            Self::View(name) => f.debug_tuple("View").field(name).finish(),
        }
    }
}

/// Route
///
/// One registered (method, pattern) → target mapping. Immutable once stored.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: Pattern,
    pub target: Target,
    pub name: Option<String>,
    pub policy: AccessPolicy,
}

/// The route picked for a request together with its extracted parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: RouteParams,
}

/// Per-method matcher. Several routes may share one matcher path (same shape,
/// different placeholder types); they are tried in registration order.
#[derive(Clone, Default)]
struct MethodMatcher {
    tree: matchit::Router<usize>,
    slots: Vec<Vec<usize>>,
    slot_by_path: HashMap<String, usize>,
}

/// RouteTable
///
/// Insertion-ordered route storage keyed by (method, pattern), with unique
/// route names.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    matchers: HashMap<Method, MethodMatcher>,
    keys: HashSet<(Method, String)>,
    names: HashMap<String, usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target` under every method listed in `methods`
    /// (`"GET"`, `"get|post"`, ...).
    pub fn insert(
        &mut self,
        pattern: &str,
        target: Target,
        methods: &str,
        name: Option<&str>,
        policy: AccessPolicy,
    ) -> Result<(), ConfigError> {
        let methods = parse_methods(methods)?;
        let pattern = Pattern::parse(pattern)?;
        policy.validate()?;

        if let Target::View(view) = &target {
            if view.trim().is_empty() {
                return Err(ConfigError::InvalidTarget("empty view name".to_string()));
            }
        }
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidTarget("empty route name".to_string()));
            }
            if self.names.contains_key(name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
        }
        for method in &methods {
            if self.keys.contains(&(method.clone(), pattern.as_str().to_string())) {
                return Err(ConfigError::DuplicateRoute {
                    method: method.to_string(),
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        let matcher_path = pattern.matcher_path();
        for method in methods {
            let index = self.routes.len();
            let matcher = self.matchers.entry(method.clone()).or_default();
            match matcher.slot_by_path.get(&matcher_path) {
                Some(&slot) => matcher.slots[slot].push(index),
                None => {
                    let slot = matcher.slots.len();
                    matcher
                        .tree
                        .insert(matcher_path.clone(), slot)
                        .map_err(|e| ConfigError::InvalidPattern {
                            pattern: pattern.as_str().to_string(),
                            reason: e.to_string(),
                        })?;
                    matcher.slots.push(vec![index]);
                    matcher.slot_by_path.insert(matcher_path.clone(), slot);
                }
            }

            self.keys.insert((method.clone(), pattern.as_str().to_string()));
            if let Some(name) = name {
                // Every method of a multi-method registration shares the name;
                // the first entry serves URL generation.
                self.names.entry(name.to_string()).or_insert(index);
            }
            self.routes.push(Route {
                method,
                pattern: pattern.clone(),
                target: target.clone(),
                name: name.map(str::to_string),
                policy: policy.clone(),
            });
        }
        Ok(())
    }

    /// Finds the first route registered for `method` whose pattern matches
    /// `path` and whose placeholder types accept the captured values.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let matcher = self.matchers.get(method)?;
        let matched = matcher.tree.at(path).ok()?;
        matcher.slots[*matched.value].iter().find_map(|&index| {
            let route = &self.routes[index];
            route
                .pattern
                .capture(&matched.params)
                .map(|params| RouteMatch { route, params })
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&Route> {
        self.names.get(name).map(|&index| &self.routes[index])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn parse_methods(raw: &str) -> Result<Vec<Method>, ConfigError> {
    let mut methods: Vec<Method> = Vec::new();
    for part in raw.split('|') {
        let part = part.trim().to_ascii_uppercase();
        if part.is_empty() {
            return Err(ConfigError::EmptyMethod);
        }
        let method = Method::from_bytes(part.as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(part.clone()))?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}
