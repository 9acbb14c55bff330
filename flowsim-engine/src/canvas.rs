//! Canvas: the owning object of an active system
//!
//! A canvas owns one system instance, its generators, its metric tracer,
//! and the shared clock. It is the single writer for its state: every
//! mutation goes through the canvas lock, so callers observe either the
//! old state or the new one, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use flowsim_components::UtilizationInfo;

use crate::ast::{Expr, FileDecl, Value};
use crate::clock::Timeline;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::flow::{FlowAnalysisResult, GeneratorSeed};
use crate::generator::{
    spawn_runner, GeneratorConfig, GeneratorId, GeneratorInfo, RunnerHandle,
};
use crate::instance::SystemInstance;
use crate::loader::FileLoader;
use crate::metrics::{
    AggregateBucket, AggregateQuery, MetricId, MetricQuery, MetricSpec, MetricStats,
    MetricTracer, QueryResult, Subscription,
};
use crate::runtime::Runtime;
use crate::strategy::{StrategyRegistry, DEFAULT_STRATEGY};

/// Whether a state-changing call did anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// The mutation was applied
    Applied,
    /// The target was already in the requested state
    AlreadyInState,
}

/// Aggregate result of start-all / stop-all
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub processed: usize,
    pub already_in_state: usize,
    pub failed: usize,
    pub failed_ids: Vec<GeneratorId>,
}

/// Partial update for a generator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorUpdate {
    pub rate: Option<f64>,
    pub duration: Option<Duration>,
}

/// One node of the system diagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramNode {
    pub name: String,
    pub component: String,
    pub native: bool,
    /// Steady-state arrival rate across all methods
    pub rate: f64,
    pub utilization: Option<f64>,
}

/// One traffic edge of the system diagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramEdge {
    pub from: String,
    pub to: String,
    pub rate: f64,
}

/// Instance graph with current traffic annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDiagram {
    pub system: String,
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<DiagramEdge>,
}

struct GeneratorEntry {
    info: GeneratorInfo,
    runner: Option<RunnerHandle>,
}

impl GeneratorEntry {
    fn is_running(&self) -> bool {
        self.runner.as_ref().map_or(false, |r| r.is_active())
    }
}

struct CanvasInner {
    file: Option<Arc<FileDecl>>,
    system: Option<Arc<SystemInstance>>,
    generators: HashMap<GeneratorId, GeneratorEntry>,
    sim_started: bool,
}

/// The owning object of an active system, its generators, and its metrics
pub struct Canvas {
    pub id: String,
    config: EngineConfig,
    runtime: Arc<Runtime>,
    loader: Arc<dyn FileLoader>,
    strategies: Arc<StrategyRegistry>,
    timeline: Arc<Timeline>,
    tracer: Arc<MetricTracer>,
    inner: RwLock<CanvasInner>,
}

impl Canvas {
    pub fn new(
        id: impl Into<String>,
        config: EngineConfig,
        runtime: Arc<Runtime>,
        loader: Arc<dyn FileLoader>,
        strategies: Arc<StrategyRegistry>,
    ) -> Self {
        let timeline = Arc::new(Timeline::new());
        let tracer = Arc::new(MetricTracer::new(&config, timeline.clone()));
        Self {
            id: id.into(),
            config,
            runtime,
            loader,
            strategies,
            timeline,
            tracer,
            inner: RwLock::new(CanvasInner {
                file: None,
                system: None,
                generators: HashMap::new(),
                sim_started: false,
            }),
        }
    }

    /// The canvas's metric tracer
    pub fn tracer(&self) -> &Arc<MetricTracer> {
        &self.tracer
    }

    /// True once a generator has started this simulation run
    pub async fn is_sim_started(&self) -> bool {
        self.inner.read().await.sim_started
    }

    /// The pinned simulation start time, if any
    pub fn simulation_start(&self) -> Option<DateTime<Utc>> {
        self.timeline.simulation_start()
    }

    /// The active system instance, if any
    pub async fn active_system(&self) -> Option<Arc<SystemInstance>> {
        self.inner.read().await.system.clone()
    }

    /// Load a file through the resolver; the active system is untouched
    pub async fn load(&self, path: &str) -> EngineResult<()> {
        let file = self.loader.load(path)?;
        let mut inner = self.inner.write().await;
        inner.file = Some(Arc::new(file));
        Ok(())
    }

    /// Instantiate a system from the loaded file and make it active.
    /// Running generators are stopped; the simulation flag resets.
    pub async fn use_system(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let file = inner
            .file
            .clone()
            .ok_or_else(|| EngineError::FailedPrecondition("no file loaded".to_string()))?;
        let system = self.runtime.new_system(file, name)?;

        Self::stop_all_runners(&mut inner).await;
        inner.system = Some(system);
        inner.sim_started = false;
        self.timeline.clear();
        info!(canvas = %self.id, system = name, "system activated");
        Ok(())
    }

    fn require_system(inner: &CanvasInner) -> EngineResult<Arc<SystemInstance>> {
        inner
            .system
            .clone()
            .ok_or_else(|| EngineError::FailedPrecondition("no active system".to_string()))
    }

    /// Evaluate an expression against the target instance's parameters and
    /// write it, returning the previous value atomically.
    pub async fn set_param(&self, path: &str, expr: &Expr) -> EngineResult<Value> {
        let inner = self.inner.write().await;
        let system = Self::require_system(&inner)?;
        let env = Self::param_env(&system, path)?;
        let value = self.runtime.eval(expr, &env)?;
        self.runtime.set_param(&system, path, value)
    }

    /// Read one parameter by `instance.Param` path
    pub async fn get_param(&self, path: &str) -> EngineResult<Value> {
        let inner = self.inner.read().await;
        let system = Self::require_system(&inner)?;
        self.runtime.get_param(&system, path)
    }

    /// Snapshot the parameters of one instance, or of every instance
    pub async fn get_parameters(
        &self,
        instance: Option<&str>,
    ) -> EngineResult<BTreeMap<String, BTreeMap<String, Value>>> {
        let inner = self.inner.read().await;
        let system = Self::require_system(&inner)?;
        let mut out = BTreeMap::new();
        match instance {
            Some(name) => {
                let target = system
                    .instance(name)
                    .ok_or_else(|| EngineError::NotFound(format!("instance {}", name)))?;
                out.insert(name.to_string(), target.params());
            }
            None => {
                for (name, target) in system.instances() {
                    out.insert(name.clone(), target.params());
                }
            }
        }
        Ok(out)
    }

    /// Apply several parameter writes as one transaction: on any failure
    /// the already-applied writes are rolled back and the error names the
    /// first failing path.
    pub async fn batch_set_parameters(
        &self,
        updates: &[(String, Expr)],
    ) -> EngineResult<()> {
        let inner = self.inner.write().await;
        let system = Self::require_system(&inner)?;

        let mut applied: Vec<(String, Value)> = Vec::with_capacity(updates.len());
        for (path, expr) in updates {
            let result = Self::param_env(&system, path)
                .and_then(|env| self.runtime.eval(expr, &env))
                .and_then(|value| self.runtime.set_param(&system, path, value));
            match result {
                Ok(old) => applied.push((path.clone(), old)),
                Err(err) => {
                    for (prev_path, prev_value) in applied.into_iter().rev() {
                        let _ = self.runtime.set_param(&system, &prev_path, prev_value);
                    }
                    return Err(EngineError::FailedPrecondition(format!(
                        "batch aborted at {}: {}",
                        path, err
                    )));
                }
            }
        }
        Ok(())
    }

    fn param_env(
        system: &Arc<SystemInstance>,
        path: &str,
    ) -> EngineResult<BTreeMap<String, Value>> {
        let instance_name = path.split_once('.').map(|(name, _)| name).ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "parameter path {} must look like instance.Param",
                path
            ))
        })?;
        Ok(system
            .instance(instance_name)
            .map(|instance| instance.params())
            .unwrap_or_default())
    }

    /// Register a generator; it starts disabled
    pub async fn add_generator(&self, config: GeneratorConfig) -> EngineResult<GeneratorInfo> {
        if config.rate <= 0.0 || !config.rate.is_finite() {
            return Err(EngineError::InvalidArgument(format!(
                "generator rate must be positive, got {}",
                config.rate
            )));
        }
        let mut inner = self.inner.write().await;
        let system = Self::require_system(&inner)?;
        let instance = system.instance(&config.component).ok_or_else(|| {
            EngineError::NotFound(format!("instance {}", config.component))
        })?;
        if !instance.has_method(&config.method) {
            return Err(EngineError::NotFound(format!(
                "method {} on instance {}",
                config.method, config.component
            )));
        }

        let info = GeneratorInfo::new(config);
        inner.generators.insert(
            info.id,
            GeneratorEntry {
                info: info.clone(),
                runner: None,
            },
        );
        Ok(info)
    }

    /// Update rate or duration; a running generator is restarted with the
    /// new settings.
    pub async fn update_generator(
        &self,
        id: GeneratorId,
        update: GeneratorUpdate,
    ) -> EngineResult<GeneratorInfo> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .generators
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("generator {}", id)))?;

        if let Some(rate) = update.rate {
            if rate <= 0.0 || !rate.is_finite() {
                return Err(EngineError::InvalidArgument(format!(
                    "generator rate must be positive, got {}",
                    rate
                )));
            }
            entry.info.rate = rate;
        }
        if let Some(duration) = update.duration {
            entry.info.duration = Some(duration);
        }
        entry.info.updated_at = Utc::now();
        let was_running = entry.is_running();
        let info = entry.info.clone();

        if was_running {
            if let Some(runner) = entry.runner.take() {
                runner.stop().await;
            }
            drop(entry);
            Self::start_entry(&mut inner, &self.runtime, &self.tracer, id)?;
        }
        Ok(info)
    }

    /// Remove a generator, stopping it first
    pub async fn delete_generator(&self, id: GeneratorId) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let mut entry = inner
            .generators
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("generator {}", id)))?;
        if let Some(runner) = entry.runner.take() {
            runner.stop().await;
        }
        Ok(())
    }

    /// All generators, newest last
    pub async fn list_generators(&self) -> Vec<GeneratorInfo> {
        let inner = self.inner.read().await;
        let mut infos: Vec<GeneratorInfo> =
            inner.generators.values().map(|e| e.info.clone()).collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Look up one generator
    pub async fn get_generator(&self, id: GeneratorId) -> EngineResult<GeneratorInfo> {
        let inner = self.inner.read().await;
        inner
            .generators
            .get(&id)
            .map(|e| e.info.clone())
            .ok_or_else(|| EngineError::NotFound(format!("generator {}", id)))
    }

    fn start_entry(
        inner: &mut CanvasInner,
        runtime: &Arc<Runtime>,
        tracer: &Arc<MetricTracer>,
        id: GeneratorId,
    ) -> EngineResult<()> {
        let system = Self::require_system(inner)?;
        let entry = inner
            .generators
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("generator {}", id)))?;
        let instance = system.instance(&entry.info.component).ok_or_else(|| {
            EngineError::NotFound(format!("instance {}", entry.info.component))
        })?;
        let runner = spawn_runner(
            &entry.info,
            runtime.clone(),
            system,
            instance,
            tracer.clone(),
        );
        entry.runner = Some(runner);
        entry.info.enabled = true;
        entry.info.updated_at = Utc::now();
        Ok(())
    }

    /// Start one generator. The first start of a run pins the simulation
    /// start time; metric timestamps follow it from here on.
    pub async fn start_generator(&self, id: GeneratorId) -> EngineResult<MutationStatus> {
        let mut inner = self.inner.write().await;
        {
            let entry = inner
                .generators
                .get(&id)
                .ok_or_else(|| EngineError::NotFound(format!("generator {}", id)))?;
            if entry.is_running() {
                return Ok(MutationStatus::AlreadyInState);
            }
        }
        Self::start_entry(&mut inner, &self.runtime, &self.tracer, id)?;
        if !inner.sim_started {
            inner.sim_started = true;
            self.timeline.start(Utc::now());
        }
        Ok(MutationStatus::Applied)
    }

    /// Stop one generator; stopping a stopped generator reports
    /// `AlreadyInState`.
    pub async fn stop_generator(&self, id: GeneratorId) -> EngineResult<MutationStatus> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .generators
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("generator {}", id)))?;
        entry.info.enabled = false;
        entry.info.updated_at = Utc::now();
        match entry.runner.take() {
            Some(runner) if runner.is_active() => {
                runner.stop().await;
                Ok(MutationStatus::Applied)
            }
            Some(finished) => {
                // the loop already stopped itself (run budget)
                finished.stop().await;
                Ok(MutationStatus::AlreadyInState)
            }
            None => Ok(MutationStatus::AlreadyInState),
        }
    }

    /// Start every generator
    pub async fn start_all_generators(&self) -> EngineResult<BatchOutcome> {
        let ids: Vec<GeneratorId> = {
            let inner = self.inner.read().await;
            inner.generators.keys().copied().collect()
        };
        let mut outcome = BatchOutcome {
            total: ids.len(),
            ..BatchOutcome::default()
        };
        for id in ids {
            match self.start_generator(id).await {
                Ok(MutationStatus::Applied) => outcome.processed += 1,
                Ok(MutationStatus::AlreadyInState) => outcome.already_in_state += 1,
                Err(_) => {
                    outcome.failed += 1;
                    outcome.failed_ids.push(id);
                }
            }
        }
        Ok(outcome)
    }

    /// Stop every generator
    pub async fn stop_all_generators(&self) -> EngineResult<BatchOutcome> {
        let ids: Vec<GeneratorId> = {
            let inner = self.inner.read().await;
            inner.generators.keys().copied().collect()
        };
        let mut outcome = BatchOutcome {
            total: ids.len(),
            ..BatchOutcome::default()
        };
        for id in ids {
            match self.stop_generator(id).await {
                Ok(MutationStatus::Applied) => outcome.processed += 1,
                Ok(MutationStatus::AlreadyInState) => outcome.already_in_state += 1,
                Err(_) => {
                    outcome.failed += 1;
                    outcome.failed_ids.push(id);
                }
            }
        }
        Ok(outcome)
    }

    async fn stop_all_runners(inner: &mut CanvasInner) {
        for entry in inner.generators.values_mut() {
            entry.info.enabled = false;
            if let Some(runner) = entry.runner.take() {
                runner.stop().await;
            }
        }
    }

    /// Stop all generators, clear the tracer, and rewind the clock.
    /// The active system stays loaded. Calling reset twice equals calling
    /// it once.
    pub async fn reset(&self) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        Self::stop_all_runners(&mut inner).await;
        self.tracer.clear().await;
        if let Some(system) = &inner.system {
            system.clock.reset();
        }
        inner.sim_started = false;
        self.timeline.clear();
        info!(canvas = %self.id, "canvas reset");
        Ok(())
    }

    /// Stop everything and release the store; the canvas is unusable after
    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        Self::stop_all_runners(&mut inner).await;
        self.tracer.close().await;
    }

    fn enabled_seeds(inner: &CanvasInner) -> Vec<GeneratorSeed> {
        inner
            .generators
            .values()
            .filter(|e| e.info.enabled)
            .map(|e| GeneratorSeed {
                component: e.info.component.clone(),
                method: e.info.method.clone(),
                rate: e.info.rate,
            })
            .collect()
    }

    /// Run flow analysis with the default strategy
    pub async fn evaluate_flow(&self) -> EngineResult<FlowAnalysisResult> {
        self.evaluate_flow_with_strategy(DEFAULT_STRATEGY).await
    }

    /// Run flow analysis with a named strategy
    pub async fn evaluate_flow_with_strategy(
        &self,
        strategy: &str,
    ) -> EngineResult<FlowAnalysisResult> {
        let inner = self.inner.write().await;
        let system = Self::require_system(&inner)?;
        let seeds = Self::enabled_seeds(&inner);
        let strategy = self.strategies.get(strategy)?;
        strategy.evaluate(&system, &seeds, &self.config)
    }

    /// Build the instance graph with current traffic annotations
    pub async fn get_system_diagram(&self) -> EngineResult<SystemDiagram> {
        let flows = self.evaluate_flow().await?;
        let inner = self.inner.read().await;
        let system = Self::require_system(&inner)?;

        let mut nodes = Vec::new();
        for (name, instance) in system.instances() {
            let infos = instance.utilization();
            let utilization = infos
                .iter()
                .find(|u| u.is_bottleneck)
                .or_else(|| infos.first())
                .map(|u| u.utilization);
            nodes.push(DiagramNode {
                name: name.clone(),
                component: instance.decl.name.clone(),
                native: instance.is_native(),
                rate: flows.instance_rate(name),
                utilization,
            });
        }

        // contributions between the same endpoints merge into one edge
        let mut merged: BTreeMap<(String, String), f64> = BTreeMap::new();
        for edge in &flows.edges {
            *merged.entry((edge.from.clone(), edge.to.clone())).or_default() += edge.rate;
        }
        let edges = merged
            .into_iter()
            .map(|((from, to), rate)| DiagramEdge { from, to, rate })
            .collect();

        Ok(SystemDiagram {
            system: system.name.clone(),
            nodes,
            edges,
        })
    }

    /// Collect utilization info from selected instances, or from all
    pub async fn get_utilization(
        &self,
        components: Option<&[String]>,
    ) -> EngineResult<Vec<UtilizationInfo>> {
        let inner = self.inner.read().await;
        let system = Self::require_system(&inner)?;
        let mut out = Vec::new();
        match components {
            Some(names) => {
                for name in names {
                    let instance = system
                        .instance(name)
                        .ok_or_else(|| EngineError::NotFound(format!("instance {}", name)))?;
                    out.extend(instance.utilization());
                }
            }
            None => {
                for (_, instance) in system.instances() {
                    out.extend(instance.utilization());
                }
            }
        }
        Ok(out)
    }

    /// Attach a metric spec and start its worker
    pub async fn add_metric(&self, spec: MetricSpec) -> EngineResult<MetricId> {
        let inner = self.inner.read().await;
        let system = Self::require_system(&inner)?;
        let resolved = system.instance(&spec.component).ok_or_else(|| {
            EngineError::NotFound(format!("instance {}", spec.component))
        })?;
        self.tracer.add_spec(spec, resolved)
    }

    /// Detach a metric spec, stopping its worker deterministically
    pub async fn delete_metric(&self, id: MetricId) -> EngineResult<()> {
        self.tracer.remove_spec(id).await
    }

    /// All attached metric specs
    pub fn list_metrics(&self) -> Vec<MetricSpec> {
        self.tracer.list_specs()
    }

    /// One metric spec
    pub fn get_metric(&self, id: MetricId) -> EngineResult<MetricSpec> {
        self.tracer.get_spec(id)
    }

    /// Page through a metric's stored points
    pub fn query_metrics(&self, id: MetricId, query: &MetricQuery) -> QueryResult {
        self.tracer.store().query(id, query)
    }

    /// Windowed aggregation over a metric's stored points
    pub fn aggregate_metrics(&self, id: MetricId, query: &AggregateQuery) -> Vec<AggregateBucket> {
        self.tracer.store().aggregate(id, query)
    }

    /// Subscribe to live appends for the given metrics; empty means all
    pub fn stream_metrics(&self, metric_ids: &[MetricId]) -> Subscription {
        self.tracer.store().subscribe(metric_ids)
    }

    /// Storage statistics for one metric
    pub fn metric_stats(&self, id: MetricId) -> Option<MetricStats> {
        self.tracer.store().stats(id)
    }
}
