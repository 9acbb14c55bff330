//! Parsed-model AST consumed by the runtime
//!
//! The DSL parser lives outside the core; these are the declarations it
//! hands over. Tests and embedders build them directly.

use serde::{Deserialize, Serialize};

use flowsim_components::ParamValue;
use flowsim_outcomes::{AccessResult, Outcomes};

/// Typed value produced by expression evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Tuple(Vec<Value>),
    Outcomes(Outcomes<AccessResult>),
}

impl Value {
    /// Numeric view; integers widen to float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Outcomes(_) => "outcomes",
        }
    }

    /// Convert to a component parameter value, when representable
    pub fn to_param(&self) -> Option<ParamValue> {
        match self {
            Value::Int(v) => Some(ParamValue::Int(*v)),
            Value::Float(v) => Some(ParamValue::Float(*v)),
            Value::Bool(v) => Some(ParamValue::Bool(*v)),
            Value::Str(v) => Some(ParamValue::Str(v.clone())),
            _ => None,
        }
    }

    /// Lift a component parameter value
    pub fn from_param(value: ParamValue) -> Self {
        match value {
            ParamValue::Int(v) => Value::Int(v),
            ParamValue::Float(v) => Value::Float(v),
            ParamValue::Bool(v) => Value::Bool(v),
            ParamValue::Str(v) => Value::Str(v),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::Tuple(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Value::Outcomes(o) => write!(f, "outcomes[{}]", o.len()),
        }
    }
}

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parameter expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value
    Lit(Value),
    /// Reference to a parameter in the evaluation environment
    Ref(String),
    /// Negation
    Neg(Box<Expr>),
    /// Binary arithmetic
    Bin {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Latency distribution literal: percentile points (probability,
    /// seconds), a failure rate with optional failure latency, and the
    /// success bucket count
    Percentiles {
        points: Vec<(f64, f64)>,
        fail_rate: f64,
        fail_latency: Option<f64>,
        success_buckets: usize,
    },
}

impl Expr {
    /// Float literal shorthand
    pub fn float(v: f64) -> Self {
        Expr::Lit(Value::Float(v))
    }

    /// Int literal shorthand
    pub fn int(v: i64) -> Self {
        Expr::Lit(Value::Int(v))
    }
}

/// Branch condition inside a declarative method body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Call a dependency method; the branch splits on its success.
    /// The callee's probability-like parameters drive static analysis.
    Call(String),
    /// Literal probability of taking the then-branch
    Prob(f64),
    /// Probability read from a parameter of the enclosing component
    Param(String),
}

/// Statement inside a declarative method body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Invoke `"dependency.Method"` and wait for it
    Call(String),
    /// Hand `"dependency.Method"` off asynchronously; the caller's latency
    /// and success are unaffected, but the traffic still flows
    Go(String),
    /// Probabilistic branch
    If {
        condition: Condition,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    /// Fixed delay, in seconds
    Delay(Expr),
}

/// Method declaration on a declarative component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    pub body: Vec<Stmt>,
}

/// Parameter declaration with an optional default expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub default: Option<Expr>,
}

/// Dependency declaration: local name plus the component type it expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsesDecl {
    pub name: String,
    pub component: String,
}

/// Component declaration: native wrapper or declarative body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub name: String,
    /// Behavior kind for native components; `None` for declarative ones
    pub native: Option<String>,
    pub params: Vec<ParamDecl>,
    pub uses: Vec<UsesDecl>,
    pub methods: Vec<MethodDecl>,
}

impl ComponentDecl {
    /// Declarative component with no parameters or dependencies yet
    pub fn declarative(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native: None,
            params: Vec::new(),
            uses: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Native component wrapping a registered behavior kind
    pub fn native(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native: Some(kind.into()),
            params: Vec::new(),
            uses: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Look up a declared method
    pub fn get_method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// One component instantiation inside a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDecl {
    /// Instance name within the system
    pub name: String,
    /// Component declaration to instantiate
    pub component: String,
    /// Parameter overrides
    pub params: Vec<(String, Expr)>,
    /// Dependency bindings: `uses` name to instance name. Unbound
    /// dependencies default to an instance named like the `uses` entry.
    pub bindings: Vec<(String, String)>,
}

impl InstanceDecl {
    pub fn new(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            params: Vec::new(),
            bindings: Vec::new(),
        }
    }
}

/// System declaration: an ordered list of instances, dependencies first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDecl {
    pub name: String,
    pub instances: Vec<InstanceDecl>,
}

/// Parsed DSL file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDecl {
    pub path: String,
    pub components: Vec<ComponentDecl>,
    pub systems: Vec<SystemDecl>,
}

impl FileDecl {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            components: Vec::new(),
            systems: Vec::new(),
        }
    }

    /// Declared systems
    pub fn get_systems(&self) -> &[SystemDecl] {
        &self.systems
    }

    /// Look up a system by name
    pub fn get_system(&self, name: &str) -> Option<&SystemDecl> {
        self.systems.iter().find(|s| s.name == name)
    }

    /// Look up a component by name
    pub fn get_component(&self, name: &str) -> Option<&ComponentDecl> {
        self.components.iter().find(|c| c.name == name)
    }
}
