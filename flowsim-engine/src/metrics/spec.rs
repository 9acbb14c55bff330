//! Metric specs and their per-spec workers
//!
//! A spec filters exit events for one component, buckets accepted values
//! into time windows, and flushes one aggregated point per window to the
//! store. Utilization specs sample the component instead of consuming
//! events. One worker task per spec; removal stops it deterministically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::matcher::ResultMatcher;
use super::store::{MetricId, MetricPoint, MetricStore};
use crate::error::{EngineError, EngineResult};
use crate::instance::ComponentInstance;
use crate::trace::TraceEvent;

/// What a spec measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// One count per accepted event
    Count,
    /// Event duration, in seconds
    Latency,
    /// Sampled component utilization
    Utilization,
}

impl MetricType {
    /// Parse a metric type name
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(MetricType::Count),
            "latency" => Ok(MetricType::Latency),
            "utilization" => Ok(MetricType::Utilization),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown metric type: {}",
                other
            ))),
        }
    }
}

/// Window aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    P50,
    P90,
    P95,
    P99,
    Rate,
    Stddev,
}

impl Aggregation {
    /// Parse an aggregation name; unknown names fall back to `sum`
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Aggregation::Sum,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "count" => Aggregation::Count,
            "p50" => Aggregation::P50,
            "p90" => Aggregation::P90,
            "p95" => Aggregation::P95,
            "p99" => Aggregation::P99,
            "rate" => Aggregation::Rate,
            "stddev" => Aggregation::Stddev,
            other => {
                warn!(aggregation = other, "unknown aggregation, falling back to sum");
                Aggregation::Sum
            }
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
            Aggregation::P50 => "p50",
            Aggregation::P90 => "p90",
            Aggregation::P95 => "p95",
            Aggregation::P99 => "p99",
            Aggregation::Rate => "rate",
            Aggregation::Stddev => "stddev",
        }
    }

    /// Apply to a window of values
    pub fn apply(&self, values: &[f64], window: Duration) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let n = values.len() as f64;
        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Avg => values.iter().sum::<f64>() / n,
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Count => n,
            Aggregation::P50 => percentile(values, 0.50),
            Aggregation::P90 => percentile(values, 0.90),
            Aggregation::P95 => percentile(values, 0.95),
            Aggregation::P99 => percentile(values, 0.99),
            Aggregation::Rate => n / window.as_secs_f64().max(f64::MIN_POSITIVE),
            Aggregation::Stddev => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                var.sqrt()
            }
        }
    }
}

/// Percentile over a sorted copy; index is `floor((n - 1) * p)`
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f64 * p).floor() as usize;
    sorted[idx]
}

/// A metric spec attached to a canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub id: MetricId,
    /// Instance name the spec is bound to
    pub component: String,
    /// Accepted methods; may be empty only for utilization specs
    pub methods: Vec<String>,
    pub metric_type: MetricType,
    pub aggregation: Aggregation,
    /// Aggregation window
    pub window: Duration,
    /// Return-value filter; absent means accept everything
    pub matcher: Option<ResultMatcher>,
}

impl MetricSpec {
    /// Validate invariants before the worker starts
    pub fn validate(&self) -> EngineResult<()> {
        if self.component.is_empty() {
            return Err(EngineError::InvalidArgument(
                "metric spec needs a component".to_string(),
            ));
        }
        if self.metric_type != MetricType::Utilization && self.methods.is_empty() {
            return Err(EngineError::InvalidArgument(
                "count and latency specs need at least one method".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(EngineError::InvalidArgument(
                "metric window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One accepted sample on its way to the worker
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpecSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Running state of a spec: input channel, stop signal, worker handle
pub(crate) struct SpecHandle {
    pub spec: MetricSpec,
    pub resolved: Arc<ComponentInstance>,
    tx: mpsc::Sender<SpecSample>,
    stop: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SpecHandle {
    /// Validate the spec and start its worker
    pub fn spawn(
        spec: MetricSpec,
        resolved: Arc<ComponentInstance>,
        store: Arc<dyn MetricStore>,
        buffer: usize,
    ) -> EngineResult<Arc<Self>> {
        spec.validate()?;
        let (tx, rx) = mpsc::channel(buffer);
        let (stop, stop_rx) = watch::channel(false);

        let worker = match spec.metric_type {
            MetricType::Utilization => tokio::spawn(utilization_worker(
                spec.clone(),
                resolved.clone(),
                store,
                stop_rx,
            )),
            _ => tokio::spawn(window_worker(spec.clone(), store, rx, stop_rx)),
        };

        Ok(Arc::new(Self {
            spec,
            resolved,
            tx,
            stop,
            handle: Mutex::new(Some(worker)),
        }))
    }

    /// Whether this spec accepts an exit event from the given instance.
    /// Component identity is pointer equality on the resolved instance.
    pub fn accepts(&self, component: &Arc<ComponentInstance>, event: &TraceEvent) -> bool {
        if self.spec.metric_type == MetricType::Utilization {
            return false;
        }
        if !Arc::ptr_eq(&self.resolved, component) {
            return false;
        }
        let method_ok = event
            .method
            .as_deref()
            .map_or(false, |m| self.spec.methods.iter().any(|s| s == m));
        if !method_ok {
            return false;
        }
        match &self.spec.matcher {
            None => true,
            Some(matcher) => matcher.matches(event.return_value_text().as_deref()),
        }
    }

    /// Non-blocking hand-off to the worker; a full buffer drops the sample
    pub fn offer(&self, sample: SpecSample) -> bool {
        self.tx.try_send(sample).is_ok()
    }

    /// Stop the worker and wait for it to flush and exit
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(spec = %self.spec.id, "metric worker ended abnormally: {}", err);
            }
        }
    }
}

/// Worker for count and latency specs: buffer a window, flush on the tick
async fn window_worker(
    spec: MetricSpec,
    store: Arc<dyn MetricStore>,
    mut rx: mpsc::Receiver<SpecSample>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut values: Vec<f64> = Vec::new();
    let mut window_start: Option<DateTime<Utc>> = None;
    let mut ticker = tokio::time::interval(spec.window);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            // stop wins over a pending tick, the tick over queued events
            biased;
            _ = stop_rx.changed() => {
                // drain what already arrived, then flush the open window
                while let Ok(sample) = rx.try_recv() {
                    if values.is_empty() {
                        window_start = Some(sample.timestamp);
                    }
                    values.push(sample.value);
                }
                flush(&spec, &store, &mut values, &mut window_start);
                break;
            }
            _ = ticker.tick() => {
                flush(&spec, &store, &mut values, &mut window_start);
            }
            sample = rx.recv() => match sample {
                Some(sample) => {
                    if values.is_empty() {
                        window_start = Some(sample.timestamp);
                    }
                    values.push(sample.value);
                }
                None => {
                    flush(&spec, &store, &mut values, &mut window_start);
                    break;
                }
            },
        }
    }
}

/// Emit the aggregated point for the current window, if it has data
fn flush(
    spec: &MetricSpec,
    store: &Arc<dyn MetricStore>,
    values: &mut Vec<f64>,
    window_start: &mut Option<DateTime<Utc>>,
) {
    if values.is_empty() {
        return;
    }
    let timestamp = window_start.take().unwrap_or_else(Utc::now);
    let value = spec.aggregation.apply(values, spec.window);
    store.write_point(spec.id, MetricPoint::new(timestamp, value));
    values.clear();
}

/// Worker for utilization specs: sample the component every window.
/// A bottleneck resource wins; otherwise the first one reported is used.
async fn utilization_worker(
    spec: MetricSpec,
    resolved: Arc<ComponentInstance>,
    store: Arc<dyn MetricStore>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(spec.window);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let infos = resolved.utilization();
                let chosen = infos
                    .iter()
                    .find(|i| i.is_bottleneck)
                    .or_else(|| infos.first());
                if let Some(info) = chosen {
                    store.write_point(
                        spec.id,
                        MetricPoint::new(Utc::now(), info.utilization),
                    );
                }
            }
        }
    }
}
