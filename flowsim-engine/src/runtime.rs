//! Runtime evaluator
//!
//! Instantiates systems from parsed declarations, evaluates parameter
//! expressions, resolves parameter paths, and executes methods: sampling
//! one outcome per call for generators, or composing the full outcome
//! distribution for analysis.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use flowsim_components::BehaviorRegistry;
use flowsim_outcomes::{
    and, from_percentiles, if_else, trim_to_size, AccessResult, Outcomes,
};

use crate::ast::{BinOp, Condition, Expr, FileDecl, InstanceDecl, Stmt, Value};
use crate::error::{EngineError, EngineResult};
use crate::instance::{ComponentInstance, SystemInstance};
use crate::metrics::TraceScope;

/// Call depth cap for declarative bodies; instance graphs are DAGs, so
/// hitting this means a malformed model rather than deep composition.
const MAX_CALL_DEPTH: usize = 64;

/// Bucket counts for bounding composed distributions
const TRIM_TRIGGER: usize = 512;
const TRIM_MAX: usize = 128;
const TRIM_THRESHOLD: f64 = 0.01;

/// The runtime evaluator shared by all canvases
pub struct Runtime {
    registry: Arc<BehaviorRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<BehaviorRegistry>) -> Self {
        Self { registry }
    }

    /// The behavior registry backing native components
    pub fn registry(&self) -> &Arc<BehaviorRegistry> {
        &self.registry
    }

    /// Instantiate a system: build every declared instance in order,
    /// bind parameters, and resolve dependency references by name.
    /// Instances must be declared dependencies-first.
    pub fn new_system(
        &self,
        file: Arc<FileDecl>,
        system_name: &str,
    ) -> EngineResult<Arc<SystemInstance>> {
        let system_decl = file
            .get_system(system_name)
            .ok_or_else(|| EngineError::NotFound(format!("system {}", system_name)))?
            .clone();

        let mut env: BTreeMap<String, Arc<ComponentInstance>> = BTreeMap::new();
        for decl in &system_decl.instances {
            if env.contains_key(&decl.name) {
                return Err(EngineError::AlreadyExists(format!(
                    "instance {} in system {}",
                    decl.name, system_name
                )));
            }
            let instance = self.build_instance(&file, decl, &env)?;
            env.insert(decl.name.clone(), instance);
        }

        Ok(Arc::new(SystemInstance::new(system_name, file, env)))
    }

    fn build_instance(
        &self,
        file: &Arc<FileDecl>,
        decl: &InstanceDecl,
        env: &BTreeMap<String, Arc<ComponentInstance>>,
    ) -> EngineResult<Arc<ComponentInstance>> {
        let component = file
            .get_component(&decl.component)
            .ok_or_else(|| EngineError::NotFound(format!("component {}", decl.component)))?;
        let component = Arc::new(component.clone());

        let instance = match &component.native {
            Some(kind) => {
                let behavior = self.registry.create(kind)?;
                let instance =
                    ComponentInstance::native(decl.name.clone(), component.clone(), behavior);
                // declared defaults first, then instance overrides
                for param in &component.params {
                    if let Some(default) = &param.default {
                        let value = self.eval(default, &BTreeMap::new())?;
                        instance.set_param(&param.name, value)?;
                    }
                }
                instance
            }
            None => {
                let mut params = BTreeMap::new();
                for param in &component.params {
                    if let Some(default) = &param.default {
                        params.insert(param.name.clone(), self.eval(default, &BTreeMap::new())?);
                    }
                }
                ComponentInstance::declarative(decl.name.clone(), component.clone(), params)
            }
        };

        for (name, expr) in &decl.params {
            let value = self.eval(expr, &instance.params())?;
            instance.set_param(name, value)?;
        }

        for uses in &component.uses {
            let target_name = decl
                .bindings
                .iter()
                .find(|(local, _)| local == &uses.name)
                .map(|(_, target)| target.as_str())
                .unwrap_or(uses.name.as_str());
            let target = env.get(target_name).ok_or_else(|| {
                EngineError::NotFound(format!(
                    "dependency {} of instance {} (instances are bound in declaration order)",
                    target_name, decl.name
                ))
            })?;
            instance.bind_dependency(&uses.name, target.clone());
        }

        Ok(Arc::new(instance))
    }

    /// Evaluate a parameter expression under the given environment
    pub fn eval(&self, expr: &Expr, env: &BTreeMap<String, Value>) -> EngineResult<Value> {
        match expr {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Ref(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("reference {}", name))),
            Expr::Neg(inner) => {
                let value = self.eval(inner, env)?;
                match value {
                    Value::Int(v) => Ok(Value::Int(-v)),
                    Value::Float(v) => Ok(Value::Float(-v)),
                    other => Err(EngineError::InvalidArgument(format!(
                        "cannot negate a {}",
                        other.type_name()
                    ))),
                }
            }
            Expr::Bin { op, lhs, rhs } => {
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                self.eval_binary(*op, &lhs, &rhs)
            }
            Expr::Percentiles {
                points,
                fail_rate,
                fail_latency,
                success_buckets,
            } => {
                let percentiles: Vec<(f64, Duration)> = points
                    .iter()
                    .map(|(p, secs)| (*p, Duration::from_secs_f64(secs.max(0.0))))
                    .collect();
                let failures = fail_latency
                    .as_ref()
                    .map(|secs| vec![(1.0, Duration::from_secs_f64(secs.max(0.0)))]);
                let outcomes = from_percentiles(
                    &percentiles,
                    *fail_rate,
                    failures.as_deref(),
                    *success_buckets,
                )?;
                Ok(Value::Outcomes(outcomes))
            }
        }
    }

    fn eval_binary(&self, op: BinOp, lhs: &Value, rhs: &Value) -> EngineResult<Value> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => match op {
                BinOp::Add => Ok(Value::Int(a + b)),
                BinOp::Sub => Ok(Value::Int(a - b)),
                BinOp::Mul => Ok(Value::Int(a * b)),
                BinOp::Div => {
                    if *b == 0 {
                        Err(EngineError::InvalidArgument("division by zero".to_string()))
                    } else {
                        Ok(Value::Int(a / b))
                    }
                }
            },
            _ => {
                let a = lhs.as_f64().ok_or_else(|| {
                    EngineError::InvalidArgument(format!(
                        "arithmetic needs numbers, got {}",
                        lhs.type_name()
                    ))
                })?;
                let b = rhs.as_f64().ok_or_else(|| {
                    EngineError::InvalidArgument(format!(
                        "arithmetic needs numbers, got {}",
                        rhs.type_name()
                    ))
                })?;
                let result = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => {
                        if b == 0.0 {
                            return Err(EngineError::InvalidArgument(
                                "division by zero".to_string(),
                            ));
                        }
                        a / b
                    }
                };
                Ok(Value::Float(result))
            }
        }
    }

    /// Write a parameter by path, returning the previous value
    pub fn set_param(
        &self,
        system: &SystemInstance,
        path: &str,
        value: Value,
    ) -> EngineResult<Value> {
        let (instance_name, param) = split_param_path(path)?;
        let instance = system
            .instance(instance_name)
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", instance_name)))?;
        instance.set_param(param, value)
    }

    /// Read a parameter by path
    pub fn get_param(&self, system: &SystemInstance, path: &str) -> EngineResult<Value> {
        let (instance_name, param) = split_param_path(path)?;
        let instance = system
            .instance(instance_name)
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", instance_name)))?;
        instance.get_param(param)
    }

    /// Execute one method call, sampling a single outcome.
    ///
    /// Emits enter/exit (and wait) trace events on the scope and returns
    /// the sampled access result.
    pub fn execute(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
        scope: &mut TraceScope,
        rng: &mut fastrand::Rng,
    ) -> EngineResult<AccessResult> {
        self.execute_inner(system, instance, method, scope, rng, 0)
    }

    fn execute_inner(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
        scope: &mut TraceScope,
        rng: &mut fastrand::Rng,
        depth: usize,
    ) -> EngineResult<AccessResult> {
        if depth > MAX_CALL_DEPTH {
            return Err(EngineError::Internal(format!(
                "call depth exceeded at {}.{}",
                instance.name, method
            )));
        }

        let started = system.clock.now();
        scope.enter(started, instance, method, Vec::new());

        let result = if let Some(behavior) = instance.behavior() {
            let outcomes = behavior.outcomes(method)?;
            *outcomes.sample(rng).ok_or_else(|| {
                EngineError::FailedPrecondition(format!(
                    "method {}.{} has no outcome mass",
                    instance.name, method
                ))
            })?
        } else {
            let method_decl = instance.decl.get_method(method).ok_or_else(|| {
                EngineError::NotFound(format!("method {} on instance {}", method, instance.name))
            })?;
            self.execute_body(system, instance, &method_decl.body, scope, rng, depth)?
        };

        let finished = started + result.latency;
        let return_value = serde_json::Value::String(if result.success {
            "ok".to_string()
        } else {
            "error".to_string()
        });
        let error_message = (!result.success)
            .then(|| format!("{}.{} failed", instance.name, method));
        scope.exit(
            finished,
            result.latency,
            instance,
            method,
            Some(return_value),
            error_message,
        );
        Ok(result)
    }

    fn execute_body(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        body: &[Stmt],
        scope: &mut TraceScope,
        rng: &mut fastrand::Rng,
        depth: usize,
    ) -> EngineResult<AccessResult> {
        let mut total = AccessResult::ok(Duration::ZERO);
        for stmt in body {
            match stmt {
                Stmt::Call(target) => {
                    let (callee, callee_method) = system.resolve_target(instance, target)?;
                    let result = self.execute_inner(
                        system,
                        &callee,
                        &callee_method,
                        scope,
                        rng,
                        depth + 1,
                    )?;
                    total = AccessResult::both(&total, &result);
                }
                Stmt::Go(target) => {
                    let (callee, callee_method) = system.resolve_target(instance, target)?;
                    scope.go(system.clock.now(), &callee, &callee_method);
                    // the hand-off runs off the caller's critical path
                    self.execute_inner(system, &callee, &callee_method, scope, rng, depth + 1)?;
                }
                Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    let take_then = match condition {
                        Condition::Call(target) => {
                            let (callee, callee_method) =
                                system.resolve_target(instance, target)?;
                            let result = self.execute_inner(
                                system,
                                &callee,
                                &callee_method,
                                scope,
                                rng,
                                depth + 1,
                            )?;
                            total = AccessResult {
                                success: total.success,
                                latency: total.latency + result.latency,
                            };
                            result.success
                        }
                        Condition::Prob(p) => rng.f64() < *p,
                        Condition::Param(name) => {
                            let p = instance
                                .get_param(name)
                                .ok()
                                .and_then(|v| v.as_f64())
                                .unwrap_or(0.5);
                            rng.f64() < p
                        }
                    };
                    let branch = if take_then { then_branch } else { else_branch };
                    let result =
                        self.execute_body(system, instance, branch, scope, rng, depth + 1)?;
                    total = AccessResult::both(&total, &result);
                }
                Stmt::Delay(expr) => {
                    let secs = self
                        .eval(expr, &instance.params())?
                        .as_f64()
                        .ok_or_else(|| {
                            EngineError::InvalidArgument("delay must be numeric".to_string())
                        })?
                        .clamp(0.0, 86_400.0);
                    let delay = Duration::from_secs_f64(secs);
                    scope.wait(system.clock.now(), delay);
                    total.latency += delay;
                }
            }
        }
        Ok(total)
    }

    /// Compose the full outcome distribution of a method.
    ///
    /// Native methods return their factory output; declarative bodies are
    /// folded with `and`/`if_else` and bounded by trimming.
    pub fn analyze(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
    ) -> EngineResult<Outcomes<AccessResult>> {
        self.analyze_inner(system, instance, method, 0)
    }

    fn analyze_inner(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        method: &str,
        depth: usize,
    ) -> EngineResult<Outcomes<AccessResult>> {
        if depth > MAX_CALL_DEPTH {
            return Err(EngineError::Internal(format!(
                "analysis depth exceeded at {}.{}",
                instance.name, method
            )));
        }
        if let Some(behavior) = instance.behavior() {
            return Ok(behavior.outcomes(method)?);
        }
        let method_decl = instance.decl.get_method(method).ok_or_else(|| {
            EngineError::NotFound(format!("method {} on instance {}", method, instance.name))
        })?;
        self.analyze_body(system, instance, &method_decl.body, depth)
    }

    fn analyze_body(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        body: &[Stmt],
        depth: usize,
    ) -> EngineResult<Outcomes<AccessResult>> {
        let mut acc = Outcomes::new();
        acc.add(1.0, AccessResult::ok(Duration::ZERO))?;

        for stmt in body {
            match stmt {
                Stmt::Call(target) => {
                    let (callee, callee_method) = system.resolve_target(instance, target)?;
                    let callee_outcomes =
                        self.analyze_inner(system, &callee, &callee_method, depth + 1)?;
                    acc = and(&acc, &callee_outcomes, AccessResult::both)?;
                }
                Stmt::Go(target) => {
                    // async hand-offs add downstream traffic, not latency
                    system.resolve_target(instance, target)?;
                }
                Stmt::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    let cond = self.condition_outcomes(system, instance, condition, depth)?;
                    let then_dist =
                        self.analyze_body(system, instance, then_branch, depth + 1)?;
                    let else_dist =
                        self.analyze_body(system, instance, else_branch, depth + 1)?;
                    let branched = if_else(
                        &cond,
                        |c: &AccessResult| c.success,
                        &then_dist,
                        &else_dist,
                        |c, b| AccessResult {
                            // the branch decides success; the condition call
                            // only contributes its latency
                            success: b.success,
                            latency: c.latency + b.latency,
                        },
                    )?;
                    acc = and(&acc, &branched, AccessResult::both)?;
                }
                Stmt::Delay(expr) => {
                    let secs = self
                        .eval(expr, &instance.params())?
                        .as_f64()
                        .ok_or_else(|| {
                            EngineError::InvalidArgument("delay must be numeric".to_string())
                        })?
                        .clamp(0.0, 86_400.0);
                    let delay = Duration::from_secs_f64(secs);
                    acc = acc.map(|r| AccessResult {
                        success: r.success,
                        latency: r.latency + delay,
                    });
                }
            }
            if acc.len() > TRIM_TRIGGER {
                acc = trim_to_size(&acc, TRIM_TRIGGER, TRIM_MAX, TRIM_THRESHOLD);
            }
        }
        Ok(acc)
    }

    fn condition_outcomes(
        &self,
        system: &SystemInstance,
        instance: &Arc<ComponentInstance>,
        condition: &Condition,
        depth: usize,
    ) -> EngineResult<Outcomes<AccessResult>> {
        match condition {
            Condition::Call(target) => {
                let (callee, callee_method) = system.resolve_target(instance, target)?;
                self.analyze_inner(system, &callee, &callee_method, depth + 1)
            }
            Condition::Prob(p) => probability_outcomes(*p),
            Condition::Param(name) => {
                let p = instance
                    .get_param(name)
                    .ok()
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5);
                probability_outcomes(p)
            }
        }
    }
}

/// Two-bucket success/failure split at probability `p`, zero latency
fn probability_outcomes(p: f64) -> EngineResult<Outcomes<AccessResult>> {
    let p = p.clamp(0.0, 1.0);
    let mut out = Outcomes::new();
    if p > 0.0 {
        out.add(p, AccessResult::ok(Duration::ZERO))?;
    }
    if p < 1.0 {
        out.add(1.0 - p, AccessResult::failed(Duration::ZERO))?;
    }
    Ok(out)
}

/// Split an `"instance.Param"` path
fn split_param_path(path: &str) -> EngineResult<(&str, &str)> {
    path.split_once('.').ok_or_else(|| {
        EngineError::InvalidArgument(format!(
            "parameter path {} must look like instance.Param",
            path
        ))
    })
}
