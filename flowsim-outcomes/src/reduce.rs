//! Distribution reduction
//!
//! Repeated composition grows bucket counts multiplicatively; these passes
//! bound distribution size while preserving total weight and availability.

use std::time::Duration;

use crate::outcomes::{Bucket, Outcomes, WEIGHT_EPSILON};
use crate::result::AccessResult;

/// Floor used when scaling the merge threshold by bucket latency.
const LATENCY_EPSILON: f64 = 1e-9;

/// Fraction of total weight carried by buckets where `success` is true.
/// An empty or weightless distribution has availability 0.
pub fn availability(o: &Outcomes<AccessResult>) -> f64 {
    let total = o.total_weight();
    if total <= WEIGHT_EPSILON {
        return 0.0;
    }
    let successful: f64 = o
        .iter()
        .filter(|b| b.value.success)
        .map(|b| b.weight)
        .sum();
    successful / total
}

/// Weight-weighted mean latency across all buckets
pub fn mean_latency(o: &Outcomes<AccessResult>) -> Duration {
    let total = o.total_weight();
    if total <= WEIGHT_EPSILON {
        return Duration::ZERO;
    }
    let secs: f64 = o
        .iter()
        .map(|b| b.weight * b.value.latency.as_secs_f64())
        .sum();
    Duration::from_secs_f64((secs / total).max(0.0))
}

/// Latency at cumulative-weight fraction `p` (0..=1), over a copy sorted by
/// latency. Returns `None` for an empty or weightless distribution.
pub fn latency_percentile(o: &Outcomes<AccessResult>, p: f64) -> Option<Duration> {
    let total = o.total_weight();
    if o.is_empty() || total <= WEIGHT_EPSILON {
        return None;
    }
    let mut buckets = o.buckets().to_vec();
    buckets.sort_by_key(|b| b.value.latency);
    let target = p.clamp(0.0, 1.0) * total;
    let mut cum = 0.0;
    for b in &buckets {
        cum += b.weight;
        if cum >= target {
            return Some(b.value.latency);
        }
    }
    buckets.last().map(|b| b.value.latency)
}

/// Merge neighboring buckets whose latencies lie within
/// `threshold * max(|latency|, epsilon)` of each other.
///
/// Buckets are first stably sorted by `(success, latency)` with failures
/// preceding successes. Merged weight is the sum; merged latency is the
/// weight-weighted mean; success merges by logical AND.
pub fn merge_adjacent(o: &Outcomes<AccessResult>, threshold: f64) -> Outcomes<AccessResult> {
    let mut buckets = o.buckets().to_vec();
    buckets.sort_by_key(|b| (b.value.success, b.value.latency));

    let mut merged: Vec<Bucket<AccessResult>> = Vec::with_capacity(buckets.len());
    for b in buckets {
        if let Some(last) = merged.last_mut() {
            let lat_a = last.value.latency.as_secs_f64();
            let lat_b = b.value.latency.as_secs_f64();
            let scale = lat_a.abs().max(LATENCY_EPSILON);
            if last.value.success == b.value.success && (lat_b - lat_a).abs() <= threshold * scale {
                let weight = last.weight + b.weight;
                let mean = if weight > WEIGHT_EPSILON {
                    (lat_a * last.weight + lat_b * b.weight) / weight
                } else {
                    lat_a
                };
                last.value.success = last.value.success && b.value.success;
                last.value.latency = Duration::from_secs_f64(mean.max(0.0));
                last.weight = weight;
                continue;
            }
        }
        merged.push(b);
    }

    Outcomes::from_buckets(merged).unwrap_or_default()
}

/// Downsample to `n` buckets placed at equal cumulative-weight quantiles,
/// each at the quantile-interpolated latency. Distributions already at or
/// below `n` buckets are returned unchanged.
pub fn interpolate(o: &Outcomes<AccessResult>, n: usize) -> Outcomes<AccessResult> {
    if n == 0 || o.len() <= n {
        return o.clone();
    }
    let total = o.total_weight();
    if total <= WEIGHT_EPSILON {
        return Outcomes::new();
    }

    let mut buckets = o.buckets().to_vec();
    buckets.sort_by_key(|b| b.value.latency);

    // Cumulative-weight center of each source bucket.
    let mut centers: Vec<f64> = Vec::with_capacity(buckets.len());
    let mut cum = 0.0;
    for b in &buckets {
        centers.push(cum + b.weight / 2.0);
        cum += b.weight;
    }

    let mut out = Outcomes::new();
    let weight = total / n as f64;
    for i in 0..n {
        let target = (i as f64 + 0.5) / n as f64 * total;
        let idx = centers.partition_point(|c| *c < target);
        let value = if idx == 0 {
            buckets[0].value
        } else if idx >= buckets.len() {
            buckets[buckets.len() - 1].value
        } else {
            let (c0, c1) = (centers[idx - 1], centers[idx]);
            let (l0, l1) = (
                buckets[idx - 1].value.latency.as_secs_f64(),
                buckets[idx].value.latency.as_secs_f64(),
            );
            let frac = if c1 - c0 > WEIGHT_EPSILON {
                (target - c0) / (c1 - c0)
            } else {
                0.0
            };
            AccessResult {
                success: buckets[idx - 1].value.success,
                latency: Duration::from_secs_f64((l0 + frac * (l1 - l0)).max(0.0)),
            }
        };
        out.push_unchecked(weight, value);
    }
    out
}

/// Bound a distribution that has grown past `trigger_len` down to at most
/// `max_len` buckets: split by success, merge-adjacent each side at
/// `merge_threshold`, interpolate each side down to its proportional share,
/// and concatenate with failures first. Total weight and availability are
/// preserved to within floating-point error.
pub fn trim_to_size(
    o: &Outcomes<AccessResult>,
    trigger_len: usize,
    max_len: usize,
    merge_threshold: f64,
) -> Outcomes<AccessResult> {
    if o.len() <= trigger_len || max_len == 0 {
        return o.clone();
    }

    let (failures, successes) = o.split(|r| !r.success);
    let failures = merge_adjacent(&failures, merge_threshold);
    let successes = merge_adjacent(&successes, merge_threshold);

    let (n_fail, n_success) = side_budgets(&failures, &successes, max_len);
    let failures = interpolate(&failures, n_fail.max(usize::from(!failures.is_empty())));
    let successes = interpolate(&successes, n_success.max(usize::from(!successes.is_empty())));

    let mut out = Outcomes::new();
    for b in failures.iter().chain(successes.iter()) {
        out.push_unchecked(b.weight, b.value);
    }
    out
}

/// Split `max_len` buckets between the failure and success sides in
/// proportion to their weight, giving every non-empty side at least one.
fn side_budgets(
    failures: &Outcomes<AccessResult>,
    successes: &Outcomes<AccessResult>,
    max_len: usize,
) -> (usize, usize) {
    let fw = failures.total_weight();
    let sw = successes.total_weight();
    if failures.is_empty() {
        return (0, max_len);
    }
    if successes.is_empty() {
        return (max_len, 0);
    }
    let total = (fw + sw).max(WEIGHT_EPSILON);
    let n_fail = ((max_len as f64 * fw / total).round() as usize).clamp(1, max_len.saturating_sub(1).max(1));
    (n_fail, max_len - n_fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_availability() {
        let mut o = Outcomes::new();
        o.add(0.9, AccessResult::ok(ms(1))).unwrap();
        o.add(0.1, AccessResult::failed(ms(5))).unwrap();
        assert!((availability(&o) - 0.9).abs() < 1e-12);
        assert_eq!(availability(&Outcomes::new()), 0.0);
    }

    #[test]
    fn test_merge_adjacent_sorts_failures_first() {
        let mut o = Outcomes::new();
        o.add(0.5, AccessResult::ok(ms(10))).unwrap();
        o.add(0.5, AccessResult::failed(ms(1))).unwrap();
        let merged = merge_adjacent(&o, 0.0);
        assert!(!merged.buckets()[0].value.success);
        assert!(merged.buckets()[1].value.success);
    }

    #[test]
    fn test_merge_adjacent_combines_close_latencies() {
        let mut o = Outcomes::new();
        o.add(1.0, AccessResult::ok(ms(100))).unwrap();
        o.add(1.0, AccessResult::ok(ms(101))).unwrap();
        o.add(1.0, AccessResult::ok(ms(200))).unwrap();
        let merged = merge_adjacent(&o, 0.05);
        assert_eq!(merged.len(), 2);
        // weight-weighted mean of 100ms and 101ms
        let lat = merged.buckets()[0].value.latency.as_secs_f64();
        assert!((lat - 0.1005).abs() < 1e-9);
        assert!((merged.total_weight() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_reduces_count_and_preserves_weight() {
        let mut o = Outcomes::new();
        for i in 0..100u64 {
            o.add(1.0, AccessResult::ok(ms(i))).unwrap();
        }
        let small = interpolate(&o, 10);
        assert_eq!(small.len(), 10);
        assert!((small.total_weight() - 100.0).abs() < 1e-6);
        // quantile placement keeps latencies increasing
        let lats: Vec<f64> = small.iter().map(|b| b.value.latency.as_secs_f64()).collect();
        assert!(lats.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_interpolate_short_input_unchanged() {
        let mut o = Outcomes::new();
        o.add(1.0, AccessResult::ok(ms(5))).unwrap();
        let same = interpolate(&o, 10);
        assert_eq!(same.len(), 1);
    }

    #[test]
    fn test_trim_preserves_weight_and_availability() {
        let mut o = Outcomes::new();
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..16_384 {
            o.add(rng.f64() + 0.01, AccessResult::ok(ms(rng.u64(1..500))))
                .unwrap();
        }
        for _ in 0..1_024 {
            o.add(rng.f64() * 0.1 + 0.001, AccessResult::failed(ms(rng.u64(1..50))))
                .unwrap();
        }
        let before_weight = o.total_weight();
        let before_avail = availability(&o);

        let trimmed = trim_to_size(&o, 512, 128, 0.02);
        assert!(trimmed.len() <= 128);
        assert!((trimmed.total_weight() - before_weight).abs() / before_weight < 1e-9);
        assert!((availability(&trimmed) - before_avail).abs() < 1e-3);
    }

    #[test]
    fn test_trim_below_trigger_is_identity() {
        let mut o = Outcomes::new();
        o.add(0.5, AccessResult::ok(ms(1))).unwrap();
        o.add(0.5, AccessResult::failed(ms(2))).unwrap();
        let same = trim_to_size(&o, 10, 4, 0.01);
        assert_eq!(same, o);
    }

    #[test]
    fn test_latency_percentile() {
        let mut o = Outcomes::new();
        for i in 1..=100u64 {
            o.add(1.0, AccessResult::ok(ms(i))).unwrap();
        }
        assert_eq!(latency_percentile(&o, 0.5), Some(ms(50)));
        assert_eq!(latency_percentile(&o, 1.0), Some(ms(100)));
        assert_eq!(latency_percentile(&Outcomes::new(), 0.5), None);
    }
}
