//! Distribution construction from latency percentiles
//!
//! Builds the `Outcomes` shape behind DSL latency literals such as
//! `{p50: 20ms, p100: 50ms, failRate: 0.1}`.

use std::time::Duration;

use crate::error::{OutcomeError, OutcomeResult};
use crate::outcomes::{Outcomes, WEIGHT_EPSILON};
use crate::result::AccessResult;

/// Build an access distribution from latency percentiles.
///
/// Produces `n_success` success buckets whose center cumulative
/// probabilities are `(i + 0.5) / n`, each latency linearly interpolated
/// between the two bracketing input percentiles. Each success bucket
/// carries weight `(1 - fail_rate) / n`. Failure buckets preserve the
/// shape of `fail_latencies` scaled to `fail_rate`; with no failure
/// profile, a single zero-latency failure bucket is emitted.
///
/// Centers outside the provided percentile range clamp to the lowest or
/// highest provided latency.
pub fn from_percentiles(
    percentiles: &[(f64, Duration)],
    fail_rate: f64,
    fail_latencies: Option<&[(f64, Duration)]>,
    n_success: usize,
) -> OutcomeResult<Outcomes<AccessResult>> {
    if n_success == 0 {
        return Err(OutcomeError::InvalidArgument(
            "success bucket count must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&fail_rate) {
        return Err(OutcomeError::InvalidArgument(format!(
            "fail rate must be within [0, 1], got {}",
            fail_rate
        )));
    }

    let success_mass = 1.0 - fail_rate;
    let mut points = percentiles.to_vec();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    if success_mass > WEIGHT_EPSILON && points.is_empty() {
        return Err(OutcomeError::InvalidArgument(
            "at least one percentile is required for success buckets".to_string(),
        ));
    }

    let mut out = Outcomes::new();

    if fail_rate > WEIGHT_EPSILON {
        match fail_latencies {
            Some(profile) if !profile.is_empty() => {
                let profile_mass: f64 = profile.iter().map(|(w, _)| w).sum();
                if profile_mass <= WEIGHT_EPSILON {
                    return Err(OutcomeError::InvalidArgument(
                        "failure latency profile carries no weight".to_string(),
                    ));
                }
                for (w, lat) in profile {
                    out.add(fail_rate * w / profile_mass, AccessResult::failed(*lat))?;
                }
            }
            _ => {
                out.add(fail_rate, AccessResult::failed(Duration::ZERO))?;
            }
        }
    }

    if success_mass > WEIGHT_EPSILON {
        let weight = success_mass / n_success as f64;
        for i in 0..n_success {
            let center = (i as f64 + 0.5) / n_success as f64;
            out.add(weight, AccessResult::ok(interpolate_latency(&points, center)))?;
        }
    }

    Ok(out)
}

/// Linear interpolation of latency at cumulative probability `p`, clamped
/// to the provided percentile bounds.
fn interpolate_latency(points: &[(f64, Duration)], p: f64) -> Duration {
    let first = points[0];
    let last = points[points.len() - 1];
    if p <= first.0 {
        return first.1;
    }
    if p >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let (p0, l0) = pair[0];
        let (p1, l1) = pair[1];
        if p >= p0 && p <= p1 {
            let span = p1 - p0;
            if span <= WEIGHT_EPSILON {
                return l1;
            }
            let frac = (p - p0) / span;
            let secs = l0.as_secs_f64() + frac * (l1.as_secs_f64() - l0.as_secs_f64());
            return Duration::from_secs_f64(secs.max(0.0));
        }
    }
    last.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::availability;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_three_success_buckets_with_failures() {
        let o = from_percentiles(
            &[(0.0, ms(10)), (0.5, ms(20)), (1.0, ms(50))],
            0.1,
            Some(&[(1.0, ms(5))]),
            3,
        )
        .unwrap();

        assert!((o.total_weight() - 1.0).abs() < 1e-9);
        assert!((availability(&o) - 0.9).abs() < 1e-9);

        let failures: Vec<_> = o.iter().filter(|b| !b.value.success).collect();
        assert_eq!(failures.len(), 1);
        assert!((failures[0].weight - 0.1).abs() < 1e-9);
        assert_eq!(failures[0].value.latency, ms(5));

        let successes: Vec<_> = o.iter().filter(|b| b.value.success).collect();
        assert_eq!(successes.len(), 3);
        let expected = [13.333_333, 20.0, 40.0];
        for (bucket, want_ms) in successes.iter().zip(expected) {
            assert!((bucket.weight - 0.3).abs() < 1e-9);
            let got_ms = bucket.value.latency.as_secs_f64() * 1e3;
            assert!(
                (got_ms - want_ms).abs() < 0.1,
                "latency {} not near {}",
                got_ms,
                want_ms
            );
        }
    }

    #[test]
    fn test_missing_p0_and_p100_clamp_to_provided() {
        let o = from_percentiles(&[(0.25, ms(10)), (0.75, ms(30))], 0.0, None, 4).unwrap();
        let lats: Vec<u128> = o.iter().map(|b| b.value.latency.as_millis()).collect();
        // centers 0.125 and 0.875 fall outside the provided range
        assert_eq!(lats[0], 10);
        assert_eq!(lats[3], 30);
        assert!(lats[1] > 10 && lats[2] < 30);
    }

    #[test]
    fn test_fail_rate_one_emits_only_failures() {
        let o = from_percentiles(&[], 1.0, Some(&[(0.6, ms(1)), (0.4, ms(9))]), 3).unwrap();
        assert!(o.iter().all(|b| !b.value.success));
        assert!((o.total_weight() - 1.0).abs() < 1e-9);
        assert!((o.buckets()[0].weight - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_zero_success_buckets_rejected() {
        let err = from_percentiles(&[(0.5, ms(10))], 0.0, None, 0).unwrap_err();
        assert!(matches!(err, OutcomeError::InvalidArgument(_)));
    }

    #[test]
    fn test_failure_shape_scaled_to_fail_rate() {
        let o = from_percentiles(
            &[(0.0, ms(1)), (1.0, ms(2))],
            0.2,
            Some(&[(3.0, ms(4)), (1.0, ms(40))]),
            2,
        )
        .unwrap();
        let failures: Vec<_> = o.iter().filter(|b| !b.value.success).collect();
        assert!((failures[0].weight - 0.15).abs() < 1e-9);
        assert!((failures[1].weight - 0.05).abs() < 1e-9);
    }
}
