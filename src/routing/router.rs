use crate::http::request::Method;
use crate::routing::handler::Handler;
use crate::routing::pattern::{split_path, PathParams, PathPattern};
use crate::routing::RouteError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

struct Route {
    pattern: PathPattern,
    handler: Arc<dyn Handler>,
}

/// Outcome of looking up a request.
pub enum Resolution {
    Matched {
        handler: Arc<dyn Handler>,
        params: PathParams,
    },
    NotFound,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Matched { params, .. } => {
                f.debug_struct("Matched").field("params", params).finish()
            }
            Resolution::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Collects routes and checks them for ambiguity as they are added.
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<Method, Vec<Route>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.route_arc(method, pattern, Arc::new(handler))
    }

    pub(crate) fn route_arc(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, RouteError> {
        let pattern = PathPattern::parse(pattern)?;
        let routes = self.routes.entry(method).or_default();

        if let Some(existing) = routes
            .iter()
            .find(|route| route.pattern.is_ambiguous_with(&pattern))
        {
            return Err(RouteError::Conflict {
                method,
                pattern: pattern.as_str().to_string(),
                existing: existing.pattern.as_str().to_string(),
            });
        }

        routes.push(Route { pattern, handler });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Orders every method's routes from most to least specific.
    pub fn build(self) -> Router {
        let mut routes = self.routes;
        for list in routes.values_mut() {
            // Stable, so equally specific non-overlapping routes keep
            // registration order.
            list.sort_by(|a, b| {
                b.pattern
                    .literal_count()
                    .cmp(&a.pattern.literal_count())
                    .then_with(|| {
                        b.pattern
                            .literal_prefix_len()
                            .cmp(&a.pattern.literal_prefix_len())
                    })
            });
        }
        Router { routes }
    }
}

/// Immutable route table shared by all connections.
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn resolve(&self, method: Method, path: &str) -> Resolution {
        let segments = split_path(path);

        if let Some(found) = self.lookup(method, &segments) {
            return found;
        }
        if method == Method::HEAD {
            if let Some(found) = self.lookup(Method::GET, &segments) {
                return found;
            }
        }
        Resolution::NotFound
    }

    fn lookup(&self, method: Method, segments: &[&str]) -> Option<Resolution> {
        self.routes.get(&method)?.iter().find_map(|route| {
            route
                .pattern
                .matches(segments)
                .map(|params| Resolution::Matched {
                    handler: Arc::clone(&route.handler),
                    params,
                })
        })
    }

}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (method, routes) in &self.routes {
            let patterns: Vec<&str> = routes.iter().map(|r| r.pattern.as_str()).collect();
            map.entry(method, &patterns);
        }
        map.finish()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (method, routes) in &self.routes {
            let patterns: Vec<&str> = routes.iter().map(|r| r.pattern.as_str()).collect();
            map.entry(method, &patterns);
        }
        map.finish()
    }
}
