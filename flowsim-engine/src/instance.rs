//! Component and system instances
//!
//! A system instance owns its component instances by name; instances hold
//! shared references to their dependencies. The `Arc` identity of an
//! instance is what the tracer matches metric specs against.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flowsim_components::{ComponentBehavior, UtilizationInfo};

use crate::ast::{ComponentDecl, FileDecl, Value};
use crate::clock::VirtualClock;
use crate::error::{EngineError, EngineResult};

/// Unique identifier for a component instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Generate a new instance ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum InstanceKind {
    /// Wraps a built-in behavior; parameters live inside the behavior
    Native(Box<dyn ComponentBehavior>),
    /// Interpreted over the declaration body; parameters live here
    Declarative {
        params: RwLock<BTreeMap<String, Value>>,
    },
}

/// A node in the instance graph
pub struct ComponentInstance {
    /// Stable identity
    pub id: InstanceId,
    /// Instance name within the owning system
    pub name: String,
    /// Declaration this instance was built from
    pub decl: Arc<ComponentDecl>,
    kind: InstanceKind,
    deps: RwLock<BTreeMap<String, Arc<ComponentInstance>>>,
}

impl ComponentInstance {
    pub(crate) fn native(
        name: impl Into<String>,
        decl: Arc<ComponentDecl>,
        behavior: Box<dyn ComponentBehavior>,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            name: name.into(),
            decl,
            kind: InstanceKind::Native(behavior),
            deps: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn declarative(
        name: impl Into<String>,
        decl: Arc<ComponentDecl>,
        params: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            name: name.into(),
            decl,
            kind: InstanceKind::Declarative {
                params: RwLock::new(params),
            },
            deps: RwLock::new(BTreeMap::new()),
        }
    }

    /// True for instances wrapping a built-in behavior
    pub fn is_native(&self) -> bool {
        matches!(self.kind, InstanceKind::Native(_))
    }

    /// The wrapped behavior, for native instances
    pub fn behavior(&self) -> Option<&dyn ComponentBehavior> {
        match &self.kind {
            InstanceKind::Native(b) => Some(b.as_ref()),
            InstanceKind::Declarative { .. } => None,
        }
    }

    pub(crate) fn bind_dependency(&self, name: &str, target: Arc<ComponentInstance>) {
        self.deps.write().insert(name.to_string(), target);
    }

    /// Resolve a dependency by its local name
    pub fn dependency(&self, name: &str) -> Option<Arc<ComponentInstance>> {
        self.deps.read().get(name).cloned()
    }

    /// All dependencies, by local name
    pub fn dependencies(&self) -> Vec<(String, Arc<ComponentInstance>)> {
        self.deps
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Method catalog: behavior methods for native instances, declared
    /// methods otherwise
    pub fn methods(&self) -> Vec<String> {
        match &self.kind {
            InstanceKind::Native(b) => b.methods(),
            InstanceKind::Declarative { .. } => {
                self.decl.methods.iter().map(|m| m.name.clone()).collect()
            }
        }
    }

    /// True if the instance exposes the method
    pub fn has_method(&self, method: &str) -> bool {
        self.methods().iter().any(|m| m == method)
    }

    /// Snapshot of current parameter values
    pub fn params(&self) -> BTreeMap<String, Value> {
        match &self.kind {
            InstanceKind::Native(b) => b
                .params()
                .into_iter()
                .map(|(k, v)| (k, Value::from_param(v)))
                .collect(),
            InstanceKind::Declarative { params } => params.read().clone(),
        }
    }

    /// Read one parameter
    pub fn get_param(&self, name: &str) -> EngineResult<Value> {
        match &self.kind {
            InstanceKind::Native(b) => Ok(Value::from_param(b.get_param(name)?)),
            InstanceKind::Declarative { params } => {
                params.read().get(name).cloned().ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "parameter {} on instance {}",
                        name, self.name
                    ))
                })
            }
        }
    }

    /// Write one parameter, returning the previous value
    pub fn set_param(&self, name: &str, value: Value) -> EngineResult<Value> {
        match &self.kind {
            InstanceKind::Native(b) => {
                let param = value.to_param().ok_or_else(|| {
                    EngineError::InvalidArgument(format!(
                        "{} value cannot be bound to a native parameter",
                        value.type_name()
                    ))
                })?;
                Ok(Value::from_param(b.set_param(name, param)?))
            }
            InstanceKind::Declarative { params } => {
                let mut guard = params.write();
                match guard.get_mut(name) {
                    Some(slot) => Ok(std::mem::replace(slot, value)),
                    None => Err(EngineError::NotFound(format!(
                        "parameter {} on instance {}",
                        name, self.name
                    ))),
                }
            }
        }
    }

    /// Probability hint for static flow analysis: a `HitRate` parameter
    /// when the instance declares one, 0.5 otherwise.
    pub fn probability_hint(&self) -> f64 {
        self.get_param("HitRate")
            .ok()
            .and_then(|v| v.as_f64())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(0.5)
    }

    /// Utilization info with the instance path filled in
    pub fn utilization(&self) -> Vec<UtilizationInfo> {
        match &self.kind {
            InstanceKind::Native(b) => b
                .utilization()
                .into_iter()
                .map(|mut info| {
                    info.component_path = Some(self.name.clone());
                    info
                })
                .collect(),
            InstanceKind::Declarative { .. } => Vec::new(),
        }
    }
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("component", &self.decl.name)
            .field("native", &self.is_native())
            .finish()
    }
}

/// An instantiated system: the component arena plus its virtual clock
pub struct SystemInstance {
    /// System name from the declaration
    pub name: String,
    /// File the system was instantiated from
    pub file: Arc<FileDecl>,
    /// Virtual-time cursor shared by all executions
    pub clock: VirtualClock,
    env: BTreeMap<String, Arc<ComponentInstance>>,
}

impl SystemInstance {
    pub(crate) fn new(
        name: impl Into<String>,
        file: Arc<FileDecl>,
        env: BTreeMap<String, Arc<ComponentInstance>>,
    ) -> Self {
        Self {
            name: name.into(),
            file,
            clock: VirtualClock::new(),
            env,
        }
    }

    /// Look up an instance by name
    pub fn instance(&self, name: &str) -> Option<Arc<ComponentInstance>> {
        self.env.get(name).cloned()
    }

    /// All instances, by name
    pub fn instances(&self) -> impl Iterator<Item = (&String, &Arc<ComponentInstance>)> {
        self.env.iter()
    }

    /// Number of instances
    pub fn len(&self) -> usize {
        self.env.len()
    }

    /// True when the system has no instances
    pub fn is_empty(&self) -> bool {
        self.env.is_empty()
    }

    /// Resolve a `"name.Method"` target against an instance's scope.
    ///
    /// A `self.` prefix is equivalent to none. The name resolves against
    /// the scope instance's dependencies first, then the system
    /// environment.
    pub fn resolve_target(
        &self,
        scope: &Arc<ComponentInstance>,
        target: &str,
    ) -> EngineResult<(Arc<ComponentInstance>, String)> {
        let stripped = target.strip_prefix("self.").unwrap_or(target);
        let (name, method) = stripped.split_once('.').ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "call target {} must look like name.Method",
                target
            ))
        })?;
        let instance = scope
            .dependency(name)
            .or_else(|| self.instance(name))
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "call target {} from instance {}",
                    target, scope.name
                ))
            })?;
        Ok((instance, method.to_string()))
    }
}
