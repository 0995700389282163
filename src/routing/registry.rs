use crate::http::request::Method;
use crate::routing::handler::Handler;
use crate::routing::router::{Router, RouterBuilder};
use crate::routing::RouteError;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Routes registered by the host, frozen into a [`Router`] on first start.
pub struct HandlerRegistry {
    pending: Mutex<Option<RouterBuilder>>,
    frozen: OnceLock<Arc<Router>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Some(RouterBuilder::new())),
            frozen: OnceLock::new(),
        }
    }

    pub fn register(
        &self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<(), RouteError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let builder = pending.as_mut().ok_or(RouteError::RegistryFrozen)?;
        builder.route(method, pattern, handler)?;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Returns the router, building it on the first call. Every later call
    /// hands out the same router.
    pub fn freeze(&self) -> Arc<Router> {
        let router = self.frozen.get_or_init(|| {
            let builder = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_default();
            tracing::debug!(routes = builder.len(), "route table frozen");
            Arc::new(builder.build())
        });
        Arc::clone(router)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;
    use crate::http::response::Response;
    use crate::routing::handler;

    fn pong() -> impl Handler {
        handler::sync(|_req: &Request| Response::ok("pong"))
    }

    #[test]
    fn frozen_registry_rejects_routes() {
        let registry = HandlerRegistry::new();
        registry.register(Method::GET, "/ping", pong()).unwrap();

        let first = registry.freeze();
        assert_eq!(
            registry.register(Method::GET, "/late", pong()),
            Err(RouteError::RegistryFrozen)
        );

        let second = registry.freeze();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn default_registry_accepts_routes() {
        let registry = HandlerRegistry::default();
        assert!(registry.register(Method::GET, "/ping", pong()).is_ok());
        assert!(!registry.is_frozen());
    }
}
