//! Flow analysis strategies
//!
//! Strategies are resolvable by name; registration fails on duplicates.
//! The default `"runtime"` strategy asks native behaviors for their flow
//! patterns and feeds converged rates back into rate-sensitive
//! parameters; `"static"` walks declarative bodies only.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use flowsim_components::{FlowPattern, ParamValue};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::flow::{
    walk_declarative_body, FlowAnalysisResult, FlowSolver, FlowSource, GeneratorSeed,
};
use crate::instance::{ComponentInstance, SystemInstance};

/// A named flow analysis strategy
pub trait FlowStrategy: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Run the analysis for the given generators
    fn evaluate(
        &self,
        system: &Arc<SystemInstance>,
        seeds: &[GeneratorSeed],
        config: &EngineConfig,
    ) -> EngineResult<FlowAnalysisResult>;
}

/// Name-keyed strategy registry
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn FlowStrategy>>>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in strategies
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        // fresh registry, names are distinct
        let _ = registry.register(Arc::new(RuntimeFlowStrategy));
        let _ = registry.register(Arc::new(StaticFlowStrategy));
        registry
    }

    /// Register a strategy; duplicate names are rejected
    pub fn register(&self, strategy: Arc<dyn FlowStrategy>) -> EngineResult<()> {
        let mut strategies = self.strategies.write();
        let name = strategy.name().to_string();
        if strategies.contains_key(&name) {
            return Err(EngineError::AlreadyExists(format!("strategy {}", name)));
        }
        strategies.insert(name, strategy);
        Ok(())
    }

    /// Resolve a strategy by name
    pub fn get(&self, name: &str) -> EngineResult<Arc<dyn FlowStrategy>> {
        self.strategies
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}", name)))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// The name canvases use when no strategy is given
pub const DEFAULT_STRATEGY: &str = "runtime";

/// Default strategy: native behaviors report their own flow patterns
pub struct RuntimeFlowStrategy;

struct RuntimeSource;

impl FlowSource for RuntimeSource {
    fn flow_of(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
        in_rate: f64,
    ) -> EngineResult<FlowPattern> {
        match instance.behavior() {
            Some(behavior) => Ok(behavior.flow_pattern(method, in_rate)?),
            None => {
                let decl = instance.decl.get_method(method).ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "method {} on instance {}",
                        method, instance.name
                    ))
                })?;
                walk_declarative_body(system, instance, &decl.body)
            }
        }
    }
}

impl FlowStrategy for RuntimeFlowStrategy {
    fn name(&self) -> &'static str {
        DEFAULT_STRATEGY
    }

    fn evaluate(
        &self,
        system: &Arc<SystemInstance>,
        seeds: &[GeneratorSeed],
        config: &EngineConfig,
    ) -> EngineResult<FlowAnalysisResult> {
        let solver = FlowSolver::new(config);
        let (status, iterations, warnings, rates, edges) =
            solver.solve(system, seeds, &RuntimeSource)?;

        // converged rates drive occupancy-sensitive components
        for (name, methods) in &rates {
            if let Some(instance) = system.instance(name) {
                if let Some(behavior) = instance.behavior() {
                    if behavior.params().contains_key("ArrivalRate") {
                        let total: f64 = methods.values().sum();
                        if let Err(err) =
                            behavior.set_param("ArrivalRate", ParamValue::Float(total))
                        {
                            debug!(instance = %name, "arrival rate feedback skipped: {}", err);
                        }
                    }
                }
            }
        }

        Ok(FlowAnalysisResult {
            strategy: self.name().to_string(),
            status,
            iterations,
            warnings,
            component_rates: rates,
            edges,
        })
    }
}

/// Baseline strategy: declarative bodies only, native components are
/// pass-through sinks with no back-pressure
pub struct StaticFlowStrategy;

struct StaticSource;

impl FlowSource for StaticSource {
    fn flow_of(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
        _in_rate: f64,
    ) -> EngineResult<FlowPattern> {
        match instance.decl.get_method(method) {
            Some(decl) if !instance.is_native() => {
                walk_declarative_body(system, instance, &decl.body)
            }
            _ => Ok(FlowPattern::leaf(1.0)),
        }
    }
}

impl FlowStrategy for StaticFlowStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    fn evaluate(
        &self,
        system: &Arc<SystemInstance>,
        seeds: &[GeneratorSeed],
        config: &EngineConfig,
    ) -> EngineResult<FlowAnalysisResult> {
        let solver = FlowSolver::new(config);
        let (status, iterations, warnings, rates, edges) =
            solver.solve(system, seeds, &StaticSource)?;
        Ok(FlowAnalysisResult {
            strategy: self.name().to_string(),
            status,
            iterations,
            warnings,
            component_rates: rates,
            edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["runtime", "static"]);
        assert!(registry.get("runtime").is_ok());
        assert!(matches!(
            registry.get("oracle"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = StrategyRegistry::with_defaults();
        let err = registry.register(Arc::new(RuntimeFlowStrategy)).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists(_)));
    }
}
