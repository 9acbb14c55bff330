//! Flowsim engine: the simulation and analysis runtime
//!
//! A canvas owns an instantiated system, its traffic generators, and its
//! metric tracer. Generators drive probabilistic method executions whose
//! trace events feed windowed metric aggregation; the flow solver derives
//! steady-state arrival rates over the same instance graph.

pub mod ast;
pub mod canvas;
pub mod clock;
pub mod config;
pub mod error;
pub mod flow;
pub mod generator;
pub mod instance;
pub mod loader;
pub mod metrics;
pub mod runtime;
pub mod service;
pub mod strategy;
pub mod trace;

pub use ast::{
    BinOp, ComponentDecl, Condition, Expr, FileDecl, InstanceDecl, MethodDecl, ParamDecl,
    Stmt, SystemDecl, UsesDecl, Value,
};
pub use canvas::{
    BatchOutcome, Canvas, DiagramEdge, DiagramNode, GeneratorUpdate, MutationStatus,
    SystemDiagram,
};
pub use clock::{Timeline, VirtualClock};
pub use config::{init_tracing, EngineConfig, LogLevel};
pub use error::{EngineError, EngineResult};
pub use flow::{
    EdgeRecorder, FlowAnalysisResult, FlowEdge, FlowSolver, FlowStatus, GeneratorSeed, RateMap,
};
pub use generator::{GeneratorConfig, GeneratorId, GeneratorInfo};
pub use instance::{ComponentInstance, InstanceId, SystemInstance};
pub use loader::{FileLoader, StaticLoader};
pub use metrics::{
    AggregateBucket, AggregateQuery, Aggregation, MetricId, MetricPoint, MetricQuery,
    MetricSpec, MetricStats, MetricStore, MetricTracer, MetricType, MetricUpdateBatch,
    QueryResult, ResultMatcher, RingMetricStore, Subscription,
};
pub use runtime::Runtime;
pub use service::EngineService;
pub use strategy::{FlowStrategy, StrategyRegistry, DEFAULT_STRATEGY};
pub use trace::{TraceEvent, TraceKind};
