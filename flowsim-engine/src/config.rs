//! Engine configuration
//!
//! Defaults, validation, and environment-based overrides. Tracing setup is
//! scoped to the process entry point; the core never installs a global
//! subscriber on its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Log verbosity, settable through `LOG_LEVEL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Parse a `LOG_LEVEL` value; unrecognized values fall back to the default
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "OFF" => LogLevel::Off,
            _ => LogLevel::Info,
        }
    }

    /// Directive understood by the tracing env filter
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log verbosity
    pub log_level: LogLevel,
    /// Per-metric ring capacity, in points
    pub metric_ring_capacity: usize,
    /// Per-metric retention window
    pub metric_retention: Duration,
    /// Default metric aggregation window
    pub metric_window: Duration,
    /// Per-spec event channel buffer
    pub spec_buffer: usize,
    /// Flow solver iteration cap
    pub flow_max_iterations: u32,
    /// Flow solver relative convergence tolerance
    pub flow_tolerance: f64,
    /// Record per-contribution flow edges during solving
    pub record_flow_edges: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            metric_ring_capacity: 10_000,
            metric_retention: Duration::from_secs(300),
            metric_window: Duration::from_secs(10),
            spec_buffer: 1_000,
            flow_max_iterations: 100,
            flow_tolerance: 1e-6,
            record_flow_edges: true,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            config.log_level = LogLevel::parse(&val);
        }
        config.validate()?;
        Ok(config)
    }

    /// Defaults for test processes: quiet unless something is wrong
    pub fn for_tests() -> Self {
        Self {
            log_level: LogLevel::Error,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.metric_ring_capacity == 0 {
            return Err(EngineError::InvalidArgument(
                "metric ring capacity must be positive".to_string(),
            ));
        }
        if self.metric_window.is_zero() {
            return Err(EngineError::InvalidArgument(
                "metric window must be positive".to_string(),
            ));
        }
        if self.spec_buffer == 0 {
            return Err(EngineError::InvalidArgument(
                "spec buffer must be positive".to_string(),
            ));
        }
        if self.flow_max_iterations == 0 {
            return Err(EngineError::InvalidArgument(
                "flow solver needs at least one iteration".to_string(),
            ));
        }
        if self.flow_tolerance <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "flow tolerance must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Install a fmt subscriber honoring the configured level.
///
/// Call once from the process entry point; repeated calls are no-ops.
pub fn init_tracing(config: &EngineConfig) {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.as_filter()))
        .try_init();
}
