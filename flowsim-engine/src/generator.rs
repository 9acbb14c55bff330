//! Traffic generators
//!
//! Each started generator runs one cooperative task driving method
//! executions at a fixed interval matching the configured rate. Execution
//! failures are logged and never stop the loop; stopping is prompt and
//! idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::instance::{ComponentInstance, SystemInstance};
use crate::metrics::MetricTracer;
use crate::runtime::Runtime;

/// Unique identifier for a generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorId(pub Uuid);

impl GeneratorId {
    /// Generate a new generator ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string
    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for GeneratorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GeneratorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for a new generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Instance name to drive
    pub component: String,
    pub method: String,
    /// Target rate in requests per second
    pub rate: f64,
    /// Optional run budget; the loop stops itself when elapsed
    pub duration: Option<Duration>,
}

/// A configured traffic source on a canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub id: GeneratorId,
    pub component: String,
    pub method: String,
    pub rate: f64,
    pub enabled: bool,
    pub duration: Option<Duration>,
    pub created_at: DateTime<Utc>,
    /// Reflects the last mutation
    pub updated_at: DateTime<Utc>,
}

impl GeneratorInfo {
    pub fn new(config: GeneratorConfig) -> Self {
        let now = Utc::now();
        Self {
            id: GeneratorId::new(),
            component: config.component,
            method: config.method,
            rate: config.rate,
            enabled: false,
            duration: config.duration,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Handle over a running generator task
pub(crate) struct RunnerHandle {
    stop: watch::Sender<bool>,
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RunnerHandle {
    /// True while the loop is still driving executions
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Signal the loop and wait for it to exit; safe to call on a loop
    /// that already stopped itself.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.handle.await {
            error!("generator task ended abnormally: {}", err);
        }
    }
}

/// Start the per-generator execution loop
pub(crate) fn spawn_runner(
    info: &GeneratorInfo,
    runtime: Arc<Runtime>,
    system: Arc<SystemInstance>,
    instance: Arc<ComponentInstance>,
    tracer: Arc<MetricTracer>,
) -> RunnerHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let active = Arc::new(AtomicBool::new(true));

    let id = info.id;
    let method = info.method.clone();
    let rate = info.rate.max(f64::MIN_POSITIVE);
    let duration = info.duration;
    let active_flag = active.clone();

    let handle = tokio::spawn(async move {
        let mut rng = fastrand::Rng::new();
        // a day-long period is the floor rate we bother scheduling
        let period = Duration::from_secs_f64((1.0 / rate).min(86_400.0));
        let mut ticker = tokio::time::interval(period);
        // catch up after a stall so the average rate holds
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
        let started = Instant::now();

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    if duration.map_or(false, |limit| started.elapsed() >= limit) {
                        debug!(generator = %id, "run budget elapsed, stopping");
                        break;
                    }
                    let mut scope = tracer.begin_scope();
                    if let Err(err) =
                        runtime.execute(&system, &instance, &method, &mut scope, &mut rng)
                    {
                        // a broken execution must not kill the loop
                        error!(generator = %id, method = %method, "execution failed: {}", err);
                    }
                }
            }
        }
        active_flag.store(false, Ordering::Release);
    });

    RunnerHandle {
        stop,
        active,
        handle,
    }
}
