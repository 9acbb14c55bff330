//! Probabilistic outcome distributions for performance modeling
//!
//! The numeric kernel of the flowsim engine: ordered weighted-bucket
//! distributions over access results, with composition (`and`, `if_else`),
//! filtering, bounded reduction, seeded sampling, and construction from
//! latency percentiles.

pub mod distrib;
pub mod error;
pub mod outcomes;
pub mod reduce;
pub mod result;

pub use distrib::from_percentiles;
pub use error::{OutcomeError, OutcomeResult};
pub use outcomes::{and, if_else, Bucket, Outcomes, WEIGHT_EPSILON};
pub use reduce::{
    availability, interpolate, latency_percentile, mean_latency, merge_adjacent, trim_to_size,
};
pub use result::{AccessResult, RangedResult};
