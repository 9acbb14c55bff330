//! Weighted-bucket outcome distributions
//!
//! An `Outcomes<V>` is an ordered sequence of `(weight, value)` buckets.
//! Weights need not sum to 1; the total weight is the cumulative probability
//! mass. Empty distributions are valid and carry zero total weight.

use serde::{Deserialize, Serialize};

use crate::error::{OutcomeError, OutcomeResult};

/// Weights at or below this threshold are treated as zero mass.
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// A single (weight, value) pair in a discrete distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket<V> {
    /// Non-negative probability mass of this bucket
    pub weight: f64,
    /// The outcome value
    pub value: V,
}

/// Ordered weighted-bucket distribution over values of type `V`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcomes<V> {
    buckets: Vec<Bucket<V>>,
}

impl<V> Default for Outcomes<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Outcomes<V> {
    /// Create an empty distribution
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }

    /// Create a distribution from existing buckets, rejecting negative weights
    pub fn from_buckets(buckets: Vec<Bucket<V>>) -> OutcomeResult<Self> {
        for b in &buckets {
            if b.weight < 0.0 || !b.weight.is_finite() {
                return Err(OutcomeError::InvalidArgument(format!(
                    "bucket weight must be a non-negative finite number, got {}",
                    b.weight
                )));
            }
        }
        Ok(Self { buckets })
    }

    /// Append a bucket; negative or non-finite weights are rejected
    pub fn add(&mut self, weight: f64, value: V) -> OutcomeResult<&mut Self> {
        if weight < 0.0 || !weight.is_finite() {
            return Err(OutcomeError::InvalidArgument(format!(
                "bucket weight must be a non-negative finite number, got {}",
                weight
            )));
        }
        self.buckets.push(Bucket { weight, value });
        Ok(self)
    }

    pub(crate) fn push_unchecked(&mut self, weight: f64, value: V) {
        self.buckets.push(Bucket { weight, value });
    }

    /// Sum of all bucket weights
    pub fn total_weight(&self) -> f64 {
        self.buckets.iter().map(|b| b.weight).sum()
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// True if the distribution has no buckets
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket slice in insertion order
    pub fn buckets(&self) -> &[Bucket<V>] {
        &self.buckets
    }

    /// Iterate buckets in order
    pub fn iter(&self) -> impl Iterator<Item = &Bucket<V>> {
        self.buckets.iter()
    }

    /// Multiply every weight by `factor`, clamped to be non-negative
    pub fn scale_weights(&mut self, factor: f64) {
        let factor = factor.max(0.0);
        for b in &mut self.buckets {
            b.weight *= factor;
        }
    }

    /// Transform values by reference, preserving weights and order
    pub fn map<U>(&self, mut f: impl FnMut(&V) -> U) -> Outcomes<U> {
        Outcomes {
            buckets: self
                .buckets
                .iter()
                .map(|b| Bucket {
                    weight: b.weight,
                    value: f(&b.value),
                })
                .collect(),
        }
    }

    /// Transform values by move, preserving weights and order
    pub fn convert<U>(self, mut f: impl FnMut(V) -> U) -> Outcomes<U> {
        Outcomes {
            buckets: self
                .buckets
                .into_iter()
                .map(|b| Bucket {
                    weight: b.weight,
                    value: f(b.value),
                })
                .collect(),
        }
    }

    /// Draw a value by cumulative weight.
    ///
    /// Returns `None` iff the distribution is empty or its total weight is
    /// at or below `WEIGHT_EPSILON`. On floating-point overshoot the last
    /// bucket is returned.
    pub fn sample(&self, rng: &mut fastrand::Rng) -> Option<&V> {
        let total = self.total_weight();
        if self.buckets.is_empty() || total <= WEIGHT_EPSILON {
            return None;
        }
        let mut target = rng.f64() * total;
        for b in &self.buckets {
            if target < b.weight {
                return Some(&b.value);
            }
            target -= b.weight;
        }
        self.buckets.last().map(|b| &b.value)
    }
}

impl<V: Clone> Outcomes<V> {
    /// Keep buckets matching `pred`; returns the kept distribution and the
    /// removed weight. Order is preserved and nothing is renormalized.
    pub fn filter(&self, pred: impl Fn(&V) -> bool) -> (Outcomes<V>, f64) {
        let mut kept = Outcomes::new();
        let mut removed = 0.0;
        for b in &self.buckets {
            if pred(&b.value) {
                kept.push_unchecked(b.weight, b.value.clone());
            } else {
                removed += b.weight;
            }
        }
        (kept, removed)
    }

    /// Split into (matched, unmatched) by `pred`, preserving order
    pub fn split(&self, pred: impl Fn(&V) -> bool) -> (Outcomes<V>, Outcomes<V>) {
        let mut matched = Outcomes::new();
        let mut unmatched = Outcomes::new();
        for b in &self.buckets {
            if pred(&b.value) {
                matched.push_unchecked(b.weight, b.value.clone());
            } else {
                unmatched.push_unchecked(b.weight, b.value.clone());
            }
        }
        (matched, unmatched)
    }

    /// Partition buckets into one group per predicate (first match wins)
    /// plus the unmatched remainder.
    pub fn partition(&self, preds: &[&dyn Fn(&V) -> bool]) -> (Vec<Outcomes<V>>, Outcomes<V>) {
        let mut groups: Vec<Outcomes<V>> = (0..preds.len()).map(|_| Outcomes::new()).collect();
        let mut unmatched = Outcomes::new();
        'bucket: for b in &self.buckets {
            for (i, pred) in preds.iter().enumerate() {
                if pred(&b.value) {
                    groups[i].push_unchecked(b.weight, b.value.clone());
                    continue 'bucket;
                }
            }
            unmatched.push_unchecked(b.weight, b.value.clone());
        }
        (groups, unmatched)
    }
}

/// Cartesian product of two distributions.
///
/// For each bucket pair the emitted weight is the product of the inputs'
/// normalized weights, so the result always carries total weight 1. Fails
/// if either input carries no mass; that precondition is the caller's.
pub fn and<A, B, Z>(
    a: &Outcomes<A>,
    b: &Outcomes<B>,
    mut reduce: impl FnMut(&A, &B) -> Z,
) -> OutcomeResult<Outcomes<Z>> {
    let wa = a.total_weight();
    let wb = b.total_weight();
    if wa <= WEIGHT_EPSILON || wb <= WEIGHT_EPSILON {
        return Err(OutcomeError::EmptyDistribution(
            "and requires both inputs to carry weight".to_string(),
        ));
    }
    let mut out = Outcomes::new();
    for ba in a.buckets() {
        for bb in b.buckets() {
            out.push_unchecked((ba.weight / wa) * (bb.weight / wb), reduce(&ba.value, &bb.value));
        }
    }
    Ok(out)
}

/// Conditional composition.
///
/// Each condition bucket selects a branch by `pred` and splits its weight
/// across that branch's buckets by the branch's normalized distribution.
/// Fails if a selected branch carries no mass.
pub fn if_else<C, B, Z>(
    cond: &Outcomes<C>,
    pred: impl Fn(&C) -> bool,
    when_true: &Outcomes<B>,
    when_false: &Outcomes<B>,
    mut reduce: impl FnMut(&C, &B) -> Z,
) -> OutcomeResult<Outcomes<Z>> {
    let wt = when_true.total_weight();
    let wf = when_false.total_weight();
    let mut out = Outcomes::new();
    for cb in cond.buckets() {
        let (branch, bw) = if pred(&cb.value) {
            (when_true, wt)
        } else {
            (when_false, wf)
        };
        if bw <= WEIGHT_EPSILON {
            return Err(OutcomeError::EmptyDistribution(
                "selected branch carries no weight".to_string(),
            ));
        }
        for bb in branch.buckets() {
            out.push_unchecked(cb.weight * (bb.weight / bw), reduce(&cb.value, &bb.value));
        }
    }
    Ok(out)
}
