//! Component behavior capability set
//!
//! Every built-in component exposes a method catalog, per-method outcome
//! factories, a flow pattern for the rate solver, and utilization info for
//! metrics. Dispatch is via trait objects; parameter updates are atomic per
//! component.

use std::collections::BTreeMap;
use std::fmt;

use flowsim_outcomes::{AccessResult, Outcomes};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ComponentResult;

/// Typed parameter value bound to a component instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl ParamValue {
    /// Numeric view; integers widen to float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Per-method description of downstream traffic for the flow solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPattern {
    /// Fraction of calls that succeed, within [0, 1]
    pub success_rate: f64,
    /// Downstream traffic per `"component.method"` target, as a fraction
    /// of inflow
    pub outflows: BTreeMap<String, f64>,
    /// Outflow amplification; values above 1 permit fan-out
    pub amplification: f64,
}

impl FlowPattern {
    /// Pattern for a component with no downstream calls
    pub fn leaf(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            outflows: BTreeMap::new(),
            amplification: 1.0,
        }
    }

    /// Add an outflow target
    pub fn with_outflow(mut self, target: impl Into<String>, multiplier: f64) -> Self {
        self.outflows.insert(target.into(), multiplier);
        self
    }
}

/// Utilization of a single resource inside a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationInfo {
    /// Name of the saturating resource (servers, connections, bandwidth)
    pub resource_name: String,
    /// Load fraction; may exceed 1 when oversubscribed
    pub utilization: f64,
    /// True when this resource limits the component
    pub is_bottleneck: bool,
    /// Instance path, filled in by the engine
    pub component_path: Option<String>,
}

/// Capability set implemented by every built-in component
pub trait ComponentBehavior: Send + Sync {
    /// Behavior kind name, as registered
    fn kind(&self) -> &'static str;

    /// Method catalog
    fn methods(&self) -> Vec<String>;

    /// Outcome distribution for a method under current parameters
    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>>;

    /// Flow pattern for a method at the given arrival rate
    fn flow_pattern(&self, method: &str, in_rate: f64) -> ComponentResult<FlowPattern>;

    /// Utilization of the component's internal resources
    fn utilization(&self) -> Vec<UtilizationInfo>;

    /// Snapshot of all parameters
    fn params(&self) -> BTreeMap<String, ParamValue>;

    /// Read one parameter
    fn get_param(&self, name: &str) -> ComponentResult<ParamValue>;

    /// Write one parameter, returning the previous value
    fn set_param(&self, name: &str, value: ParamValue) -> ComponentResult<ParamValue>;
}

/// Atomic parameter environment shared by the built-in behaviors.
///
/// The key set is fixed at construction; `set` on an undeclared key is
/// refused so the canvas can surface it as an error.
pub struct ParamEnv {
    values: RwLock<BTreeMap<String, ParamValue>>,
}

impl ParamEnv {
    /// Build from declared defaults
    pub fn new(defaults: &[(&str, ParamValue)]) -> Self {
        Self {
            values: RwLock::new(
                defaults
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ),
        }
    }

    /// Copy of the full parameter map
    pub fn snapshot(&self) -> BTreeMap<String, ParamValue> {
        self.values.read().clone()
    }

    /// Read one parameter
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.values.read().get(name).cloned()
    }

    /// Write one declared parameter, returning the old value;
    /// `None` when the key is not declared.
    pub fn set(&self, name: &str, value: ParamValue) -> Option<ParamValue> {
        let mut values = self.values.write();
        if !values.contains_key(name) {
            return None;
        }
        values.insert(name.to_string(), value)
    }

    /// Numeric parameter with a fallback for non-numeric values
    pub fn f64(&self, name: &str, default: f64) -> f64 {
        self.get(name).and_then(|v| v.as_f64()).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_env_set_returns_old() {
        let env = ParamEnv::new(&[("HitRate", ParamValue::Float(0.8))]);
        let old = env.set("HitRate", ParamValue::Float(0.9)).unwrap();
        assert_eq!(old, ParamValue::Float(0.8));
        assert_eq!(env.f64("HitRate", 0.0), 0.9);
    }

    #[test]
    fn test_param_env_rejects_undeclared() {
        let env = ParamEnv::new(&[("Size", ParamValue::Int(10))]);
        assert!(env.set("Unknown", ParamValue::Int(1)).is_none());
        assert_eq!(env.get("Size"), Some(ParamValue::Int(10)));
    }

    #[test]
    fn test_flow_pattern_leaf_clamps_success_rate() {
        let p = FlowPattern::leaf(1.7);
        assert_eq!(p.success_rate, 1.0);
        assert!(p.outflows.is_empty());
    }
}
