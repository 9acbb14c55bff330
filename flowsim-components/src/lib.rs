//! Built-in component behaviors for the flowsim engine
//!
//! Each behavior models one infrastructure building block (cache, disk,
//! queue, pool, link) as a stateless-per-call capability set: a method
//! catalog, outcome factories driven by current parameters, a flow pattern
//! for the rate solver, and utilization info for metrics.

pub mod behavior;
pub mod cache;
pub mod disk;
pub mod error;
pub mod index;
pub mod link;
pub mod pool;
pub mod queue;
pub mod registry;

pub use behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
pub use cache::CacheBehavior;
pub use disk::DiskBehavior;
pub use error::{ComponentError, ComponentResult};
pub use index::IndexBehavior;
pub use link::LinkBehavior;
pub use pool::PoolBehavior;
pub use queue::QueueBehavior;
pub use registry::{BehaviorFactory, BehaviorRegistry};
