//! Trace events emitted by method executions

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// Execution entered a component method
    Enter,
    /// Execution left a component method; carries the duration
    Exit,
    /// Asynchronous hand-off
    Go,
    /// Explicit delay inside a method body
    Wait,
}

/// One event in an execution's trace stream.
///
/// Timestamps are virtual time; the metric pipeline maps them onto the
/// canvas timeline when points are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceKind,
    /// Event ID, unique per tracer
    pub id: u64,
    /// Enclosing event, if any
    pub parent_id: Option<u64>,
    /// Virtual timestamp
    pub timestamp: Duration,
    /// Duration, for exit and wait events
    pub duration: Option<Duration>,
    /// Instance name, when the event concerns a component
    pub component: Option<String>,
    /// Method name, when the event concerns a method
    pub method: Option<String>,
    /// Call arguments
    pub args: Vec<serde_json::Value>,
    /// Return value, for exit events
    pub return_value: Option<serde_json::Value>,
    /// Error message, for failed executions
    pub error_message: Option<String>,
}

impl TraceEvent {
    /// String form of the return value, as the result matchers see it
    pub fn return_value_text(&self) -> Option<String> {
        self.return_value.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}
