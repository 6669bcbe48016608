//! Registered unit identities.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::middleware::Middleware;

/// Maps unit identities to unit instances.
///
/// Aliases and groups in the settings ultimately resolve to identities
/// registered here. Built once at startup and read-only afterwards.
///
/// # Example
///
/// ```
/// use strata_middleware::stages::RequestIdMiddleware;
/// use strata_middleware::MiddlewareRegistry;
///
/// let registry = MiddlewareRegistry::new()
///     .with("strata.request_id", RequestIdMiddleware::new());
///
/// assert!(registry.contains("strata.request_id"));
/// ```
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    units: IndexMap<String, Arc<dyn Middleware>>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `unit` under `id`, replacing any earlier registration.
    pub fn register(&mut self, id: impl Into<String>, unit: impl Middleware) -> &mut Self {
        self.register_shared(id, Arc::new(unit))
    }

    /// Registers an already shared unit under `id`.
    pub fn register_shared(&mut self, id: impl Into<String>, unit: Arc<dyn Middleware>) -> &mut Self {
        let id = id.into();
        if let Some(previous) = self.units.insert(id.clone(), unit) {
            tracing::warn!(unit = %id, replaced = previous.name(), "middleware identity registered twice");
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, unit: impl Middleware) -> Self {
        self.register(id, unit);
        self
    }

    /// Looks up a unit.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Middleware>> {
        self.units.get(id)
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// Registered identities in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// Number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.units.iter().map(|(id, unit)| (id, unit.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::FnMiddleware;

    fn passthrough(name: &'static str) -> impl Middleware {
        FnMiddleware::new(name, |ctx, next, _| Box::pin(async move { next.run(ctx).await }))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = MiddlewareRegistry::new();
        registry.register("a", passthrough("a")).register("b", passthrough("b"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("b").map(|u| u.name()), Some("b"));
        assert!(registry.get("c").is_none());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = MiddlewareRegistry::new()
            .with("auth", passthrough("first"))
            .with("auth", passthrough("second"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("auth").map(|u| u.name()), Some("second"));
    }
}
