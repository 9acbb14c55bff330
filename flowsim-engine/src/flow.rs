//! Flow-rate solver
//!
//! Iterative fixed point over the instance graph: generator rates are
//! re-injected every round and every known flow propagates through its
//! method's flow pattern until rates stop moving.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flowsim_components::FlowPattern;
use flowsim_outcomes::availability;

use crate::ast::{Condition, Stmt};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::instance::{ComponentInstance, SystemInstance};

const RATE_EPSILON: f64 = 1e-9;

/// Per-instance, per-method arrival rates in requests per second
pub type RateMap = BTreeMap<String, BTreeMap<String, f64>>;

/// Traffic source seeding the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSeed {
    /// Instance name
    pub component: String,
    pub method: String,
    /// Requests per second
    pub rate: f64,
}

/// Solver termination status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Converged,
    Partial,
}

/// One recorded rate contribution between two method endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Source `"instance.Method"`
    pub from: String,
    /// Target `"instance.Method"`
    pub to: String,
    /// Requests per second, always positive
    pub rate: f64,
}

/// Edge capture for diagram annotation; `clear` keeps the allocation
#[derive(Debug, Default)]
pub struct EdgeRecorder {
    edges: Vec<FlowEdge>,
    enabled: bool,
}

impl EdgeRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            edges: Vec::new(),
            enabled,
        }
    }

    /// Record one contribution; zero or negative rates are skipped
    pub fn record(&mut self, from: String, to: String, rate: f64) {
        if self.enabled && rate > 0.0 {
            self.edges.push(FlowEdge { from, to, rate });
        }
    }

    /// Truncate without reallocating
    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Take the recorded edges
    pub fn into_edges(self) -> Vec<FlowEdge> {
        self.edges
    }
}

/// Result of one flow analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAnalysisResult {
    /// Strategy that produced this result
    pub strategy: String,
    pub status: FlowStatus,
    /// Rounds used
    pub iterations: u32,
    pub warnings: Vec<String>,
    /// Instance name to method to steady-state RPS
    pub component_rates: RateMap,
    /// Per-contribution edges, when recording was enabled
    pub edges: Vec<FlowEdge>,
}

impl FlowAnalysisResult {
    /// Total arrival rate of one instance across its methods
    pub fn instance_rate(&self, name: &str) -> f64 {
        self.component_rates
            .get(name)
            .map(|methods| methods.values().sum())
            .unwrap_or(0.0)
    }

    /// Rate of one `instance.Method` endpoint
    pub fn method_rate(&self, name: &str, method: &str) -> f64 {
        self.component_rates
            .get(name)
            .and_then(|methods| methods.get(method))
            .copied()
            .unwrap_or(0.0)
    }
}

/// How a strategy derives flow patterns per `(instance, method, rate)`
pub trait FlowSource {
    fn flow_of(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
        in_rate: f64,
    ) -> EngineResult<FlowPattern>;
}

/// Iterative fixed-point solver
pub struct FlowSolver {
    max_iterations: u32,
    tolerance: f64,
    record_edges: bool,
}

impl FlowSolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_iterations: config.flow_max_iterations,
            tolerance: config.flow_tolerance,
            record_edges: config.record_flow_edges,
        }
    }

    /// Propagate generator rates to a steady state.
    ///
    /// Each round re-injects the generator rates and adds every flow's
    /// outflow contributions; convergence is the maximum relative rate
    /// change dropping under the tolerance. Exhausting the iteration cap
    /// yields a partial result with a warning, never an error.
    pub fn solve(
        &self,
        system: &SystemInstance,
        seeds: &[GeneratorSeed],
        source: &dyn FlowSource,
    ) -> EngineResult<(FlowStatus, u32, Vec<String>, RateMap, Vec<FlowEdge>)> {
        let mut injected: RateMap = BTreeMap::new();
        for seed in seeds {
            let instance = system.instance(&seed.component).ok_or_else(|| {
                EngineError::NotFound(format!("generator target {}", seed.component))
            })?;
            if !instance.has_method(&seed.method) {
                return Err(EngineError::NotFound(format!(
                    "method {} on instance {}",
                    seed.method, seed.component
                )));
            }
            *injected
                .entry(seed.component.clone())
                .or_default()
                .entry(seed.method.clone())
                .or_default() += seed.rate;
        }

        let mut rates = injected.clone();
        let mut recorder = EdgeRecorder::new(self.record_edges);

        for iteration in 1..=self.max_iterations {
            recorder.clear();
            let mut next = injected.clone();

            for (name, methods) in &rates {
                let instance = system
                    .instance(name)
                    .ok_or_else(|| EngineError::NotFound(format!("instance {}", name)))?;
                for (method, rate) in methods {
                    if *rate <= RATE_EPSILON {
                        continue;
                    }
                    let pattern = source.flow_of(system, &instance, method, *rate)?;
                    for (target, multiplier) in &pattern.outflows {
                        let (callee, callee_method) =
                            system.resolve_target(&instance, target)?;
                        let out_rate = rate * multiplier * pattern.amplification;
                        *next
                            .entry(callee.name.clone())
                            .or_default()
                            .entry(callee_method.clone())
                            .or_default() += out_rate;
                        recorder.record(
                            format!("{}.{}", name, method),
                            format!("{}.{}", callee.name, callee_method),
                            out_rate,
                        );
                    }
                }
            }

            let delta = max_relative_delta(&rates, &next);
            debug!(iteration, delta, "flow solver round");
            rates = next;
            if delta < self.tolerance {
                return Ok((
                    FlowStatus::Converged,
                    iteration,
                    Vec::new(),
                    rates,
                    recorder.into_edges(),
                ));
            }
        }

        Ok((
            FlowStatus::Partial,
            self.max_iterations,
            vec!["flow analysis did not converge".to_string()],
            rates,
            recorder.into_edges(),
        ))
    }
}

/// Maximum relative rate change between two rounds, over the key union
fn max_relative_delta(prev: &RateMap, next: &RateMap) -> f64 {
    let mut delta: f64 = 0.0;
    for (name, methods) in next {
        for (method, rate) in methods {
            let before = prev
                .get(name)
                .and_then(|m| m.get(method))
                .copied()
                .unwrap_or(0.0);
            delta = delta.max((rate - before).abs() / before.max(RATE_EPSILON));
        }
    }
    for (name, methods) in prev {
        for (method, rate) in methods {
            let still_there = next.get(name).and_then(|m| m.get(method)).is_some();
            if !still_there {
                delta = delta.max(rate.abs() / rate.abs().max(RATE_EPSILON));
            }
        }
    }
    delta
}

/// Statically derive the flow pattern of a declarative method body.
///
/// Calls contribute their full branch share; an `if` splits its branches
/// by the condition's probability; delays contribute nothing; sequential
/// statements sum.
pub fn walk_declarative_body(
    system: &SystemInstance,
    instance: &Arc<ComponentInstance>,
    body: &[Stmt],
) -> EngineResult<FlowPattern> {
    let mut pattern = FlowPattern::leaf(1.0);
    walk_stmts(system, instance, body, 1.0, &mut pattern.outflows)?;
    Ok(pattern)
}

fn walk_stmts(
    system: &SystemInstance,
    instance: &Arc<ComponentInstance>,
    body: &[Stmt],
    scale: f64,
    outflows: &mut BTreeMap<String, f64>,
) -> EngineResult<()> {
    for stmt in body {
        match stmt {
            Stmt::Call(target) | Stmt::Go(target) => {
                *outflows.entry(target.clone()).or_default() += scale;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if let Condition::Call(target) = condition {
                    // the condition call itself is traffic
                    *outflows.entry(target.clone()).or_default() += scale;
                }
                let p = condition_probability(system, instance, condition)?;
                walk_stmts(system, instance, then_branch, scale * p, outflows)?;
                walk_stmts(system, instance, else_branch, scale * (1.0 - p), outflows)?;
            }
            Stmt::Delay(_) => {}
        }
    }
    Ok(())
}

/// Probability that a branch condition holds.
///
/// For condition calls on native components this is the availability of
/// the callee's outcome distribution (a cache read succeeds at its hit
/// rate); otherwise a probability-like parameter, defaulting to 0.5.
fn condition_probability(
    system: &SystemInstance,
    instance: &Arc<ComponentInstance>,
    condition: &Condition,
) -> EngineResult<f64> {
    let p = match condition {
        Condition::Call(target) => {
            let (callee, method) = system.resolve_target(instance, target)?;
            match callee.behavior() {
                Some(behavior) => behavior
                    .outcomes(&method)
                    .map(|o| availability(&o))
                    .unwrap_or_else(|_| callee.probability_hint()),
                None => callee.probability_hint(),
            }
        }
        Condition::Prob(p) => *p,
        Condition::Param(name) => instance
            .get_param(name)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5),
    };
    Ok(p.clamp(0.0, 1.0))
}
