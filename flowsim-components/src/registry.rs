//! Behavior registry
//!
//! Maps behavior kind names to constructors. Registration fails on
//! duplicate names; instantiation fails on unknown kinds.

use std::collections::HashMap;

use crate::behavior::ComponentBehavior;
use crate::cache::CacheBehavior;
use crate::disk::DiskBehavior;
use crate::error::{ComponentError, ComponentResult};
use crate::index::IndexBehavior;
use crate::link::LinkBehavior;
use crate::pool::PoolBehavior;
use crate::queue::QueueBehavior;

/// Constructor for a component behavior
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn ComponentBehavior> + Send + Sync>;

/// Name-keyed registry of component behavior constructors
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with all built-in behaviors registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, BehaviorFactory); 6] = [
            ("cache", Box::new(|| Box::new(CacheBehavior::new()))),
            ("disk", Box::new(|| Box::new(DiskBehavior::new()))),
            ("queue", Box::new(|| Box::new(QueueBehavior::new()))),
            ("pool", Box::new(|| Box::new(PoolBehavior::new()))),
            ("link", Box::new(|| Box::new(LinkBehavior::new()))),
            ("index", Box::new(|| Box::new(IndexBehavior::new()))),
        ];
        for (kind, factory) in builtins {
            // fresh registry, names are distinct
            let _ = registry.register(kind, factory);
        }
        registry
    }

    /// Register a behavior kind; duplicate names are rejected
    pub fn register(&mut self, kind: &str, factory: BehaviorFactory) -> ComponentResult<()> {
        if self.factories.contains_key(kind) {
            return Err(ComponentError::AlreadyRegistered(kind.to_string()));
        }
        self.factories.insert(kind.to_string(), factory);
        Ok(())
    }

    /// Instantiate a behavior by kind name
    pub fn create(&self, kind: &str) -> ComponentResult<Box<dyn ComponentBehavior>> {
        self.factories
            .get(kind)
            .map(|f| f())
            .ok_or_else(|| ComponentError::UnknownKind(kind.to_string()))
    }

    /// True if the kind is registered
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = BehaviorRegistry::with_builtins();
        assert_eq!(
            registry.kinds(),
            vec!["cache", "disk", "index", "link", "pool", "queue"]
        );
        let cache = registry.create("cache").unwrap();
        assert_eq!(cache.kind(), "cache");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = BehaviorRegistry::with_builtins();
        let err = registry
            .register("cache", Box::new(|| Box::new(CacheBehavior::new())))
            .unwrap_err();
        assert!(matches!(err, ComponentError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_unknown_kind_fails() {
        let registry = BehaviorRegistry::with_builtins();
        assert!(matches!(
            registry.create("mainframe"),
            Err(ComponentError::UnknownKind(_))
        ));
    }
}
