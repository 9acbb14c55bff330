//! Metric pipeline: tracer, specs, store
//!
//! The tracer is the single consumer of execution events. Exit events are
//! dispatched to every matching spec over a bounded channel; a full buffer
//! drops the event with a warning and a per-metric dropped count, so the
//! executor never back-pressures into the tracer.

pub mod matcher;
pub mod spec;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

pub use matcher::ResultMatcher;
pub use spec::{Aggregation, MetricSpec, MetricType};
pub use store::{
    AggregateBucket, AggregateQuery, MetricId, MetricPoint, MetricQuery, MetricStats, MetricStore,
    MetricUpdateBatch, QueryResult, RingMetricStore, Subscription,
};

use crate::clock::Timeline;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::instance::ComponentInstance;
use crate::trace::{TraceEvent, TraceKind};
use spec::{SpecHandle, SpecSample};

/// Owns the metric store and all metric specs of one canvas
pub struct MetricTracer {
    store: Arc<dyn MetricStore>,
    timeline: Arc<Timeline>,
    specs: RwLock<Vec<Arc<SpecHandle>>>,
    next_event_id: AtomicU64,
    buffer: usize,
}

impl MetricTracer {
    pub fn new(config: &EngineConfig, timeline: Arc<Timeline>) -> Self {
        Self {
            store: Arc::new(RingMetricStore::new(config)),
            timeline,
            specs: RwLock::new(Vec::new()),
            next_event_id: AtomicU64::new(1),
            buffer: config.spec_buffer,
        }
    }

    /// The metric store
    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Validate a spec, bind it to the resolved instance, start its worker
    pub fn add_spec(
        &self,
        spec: MetricSpec,
        resolved: Arc<ComponentInstance>,
    ) -> EngineResult<MetricId> {
        let id = spec.id;
        {
            let specs = self.specs.read();
            if specs.iter().any(|h| h.spec.id == id) {
                return Err(EngineError::AlreadyExists(format!("metric {}", id)));
            }
        }
        let handle = SpecHandle::spawn(spec, resolved, self.store.clone(), self.buffer)?;
        self.specs.write().push(handle);
        Ok(id)
    }

    /// Stop a spec's worker and detach it
    pub async fn remove_spec(&self, id: MetricId) -> EngineResult<()> {
        let handle = {
            let mut specs = self.specs.write();
            let idx = specs
                .iter()
                .position(|h| h.spec.id == id)
                .ok_or_else(|| EngineError::NotFound(format!("metric {}", id)))?;
            specs.swap_remove(idx)
        };
        handle.stop().await;
        Ok(())
    }

    /// Snapshot of all attached specs
    pub fn list_specs(&self) -> Vec<MetricSpec> {
        self.specs.read().iter().map(|h| h.spec.clone()).collect()
    }

    /// Look up one spec
    pub fn get_spec(&self, id: MetricId) -> EngineResult<MetricSpec> {
        self.specs
            .read()
            .iter()
            .find(|h| h.spec.id == id)
            .map(|h| h.spec.clone())
            .ok_or_else(|| EngineError::NotFound(format!("metric {}", id)))
    }

    /// Begin a trace scope for one execution
    pub fn begin_scope(self: &Arc<Self>) -> TraceScope {
        TraceScope {
            tracer: self.clone(),
            stack: Vec::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Dispatch an exit event to every matching spec
    fn dispatch_exit(&self, component: &Arc<ComponentInstance>, event: &TraceEvent) {
        let specs = self.specs.read();
        for handle in specs.iter() {
            if !handle.accepts(component, event) {
                continue;
            }
            let value = match handle.spec.metric_type {
                MetricType::Latency => {
                    event.duration.unwrap_or(Duration::ZERO).as_secs_f64()
                }
                _ => 1.0,
            };
            let sample = SpecSample {
                timestamp: self.timeline.map(event.timestamp),
                value,
            };
            if !handle.offer(sample) {
                self.store.record_dropped(handle.spec.id, 1);
                warn!(
                    metric = %handle.spec.id,
                    component = %component.name,
                    "spec buffer full, dropping event"
                );
            }
        }
    }

    /// Stop all specs and wipe stored points; subscribers stay connected
    pub async fn clear(&self) {
        let handles: Vec<Arc<SpecHandle>> = std::mem::take(&mut *self.specs.write());
        for handle in handles {
            handle.stop().await;
        }
        self.store.clear();
    }

    /// Stop all specs and release the store
    pub async fn close(&self) {
        let handles: Vec<Arc<SpecHandle>> = std::mem::take(&mut *self.specs.write());
        for handle in handles {
            handle.stop().await;
        }
        self.store.close();
    }
}

/// Per-execution trace context: event ids plus the parent chain.
///
/// `enter` pushes the new event onto the parent stack and `exit` pops it;
/// `push_parent`/`pop_parent` let aggregating callers splice in extra
/// nesting levels.
pub struct TraceScope {
    tracer: Arc<MetricTracer>,
    stack: Vec<u64>,
}

impl TraceScope {
    /// Record entry into a component method; returns the new event id
    pub fn enter(
        &mut self,
        timestamp: Duration,
        component: &Arc<ComponentInstance>,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> u64 {
        let id = self.tracer.next_id();
        tracing::trace!(
            event = "enter",
            id,
            parent = ?self.stack.last(),
            timestamp = ?timestamp,
            component = %component.name,
            method,
            args = ?args,
        );
        self.stack.push(id);
        id
    }

    /// Record exit from a component method and dispatch to metric specs
    pub fn exit(
        &mut self,
        timestamp: Duration,
        duration: Duration,
        component: &Arc<ComponentInstance>,
        method: &str,
        return_value: Option<serde_json::Value>,
        error_message: Option<String>,
    ) {
        let id = self.stack.pop().unwrap_or_else(|| self.tracer.next_id());
        let event = TraceEvent {
            kind: TraceKind::Exit,
            id,
            parent_id: self.stack.last().copied(),
            timestamp,
            duration: Some(duration),
            component: Some(component.name.clone()),
            method: Some(method.to_string()),
            args: Vec::new(),
            return_value,
            error_message,
        };
        self.tracer.dispatch_exit(component, &event);
    }

    /// Record an asynchronous hand-off to another component method
    pub fn go(&mut self, timestamp: Duration, component: &Arc<ComponentInstance>, method: &str) {
        let id = self.tracer.next_id();
        tracing::trace!(
            event = "go",
            id,
            parent = ?self.stack.last(),
            timestamp = ?timestamp,
            component = %component.name,
            method,
        );
    }

    /// Record an explicit delay inside the current context
    pub fn wait(&mut self, timestamp: Duration, duration: Duration) {
        let id = self.tracer.next_id();
        tracing::trace!(
            event = "wait",
            id,
            parent = ?self.stack.last(),
            timestamp = ?timestamp,
            duration = ?duration,
        );
    }

    /// Push an explicit parent id for nested aggregation
    pub fn push_parent(&mut self, id: u64) {
        self.stack.push(id);
    }

    /// Pop the innermost parent id
    pub fn pop_parent(&mut self) -> Option<u64> {
        self.stack.pop()
    }
}
