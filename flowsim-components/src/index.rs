//! Sorted-index store behavior
//!
//! Point lookups and mutations share one latency profile; range reads and
//! scans pay a multiple of it that grows with the configured selectivity.

use std::collections::BTreeMap;
use std::time::Duration;

use flowsim_outcomes::{from_percentiles, AccessResult, Outcomes};

use crate::behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
use crate::error::{ComponentError, ComponentResult};

const SUCCESS_BUCKETS: usize = 4;

/// Index component: `Find`, `Insert`, `Delete`, `Range`, `Scan`
pub struct IndexBehavior {
    params: ParamEnv,
}

impl IndexBehavior {
    pub fn new() -> Self {
        Self {
            params: ParamEnv::new(&[
                ("P50Latency", ParamValue::Float(0.002)),
                ("P99Latency", ParamValue::Float(0.008)),
                ("MissRate", ParamValue::Float(0.05)),
                ("RangeSelectivity", ParamValue::Float(10.0)),
            ]),
        }
    }

    fn miss_rate(&self) -> f64 {
        self.params.f64("MissRate", 0.05).clamp(0.0, 1.0)
    }

    /// Latency multiple and whether the method can miss
    fn method_profile(&self, method: &str) -> ComponentResult<(f64, bool)> {
        let selectivity = self.params.f64("RangeSelectivity", 10.0).max(1.0);
        match method {
            "Find" => Ok((1.0, true)),
            "Insert" => Ok((1.5, false)),
            "Delete" => Ok((1.5, true)),
            "Range" => Ok((selectivity, false)),
            "Scan" => Ok((selectivity * 10.0, false)),
            _ => Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            }),
        }
    }
}

impl Default for IndexBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBehavior for IndexBehavior {
    fn kind(&self) -> &'static str {
        "index"
    }

    fn methods(&self) -> Vec<String> {
        ["Find", "Insert", "Delete", "Range", "Scan"]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>> {
        let (scale, can_miss) = self.method_profile(method)?;
        let p50 = self.params.f64("P50Latency", 0.002).max(0.0) * scale;
        let p99 = self.params.f64("P99Latency", 0.008).max(0.0) * scale;
        // a miss answers at point-lookup speed
        let miss_latency = Duration::from_secs_f64(self.params.f64("P50Latency", 0.002).max(0.0));
        let miss_rate = if can_miss { self.miss_rate() } else { 0.0 };
        let out = from_percentiles(
            &[
                (0.5, Duration::from_secs_f64(p50)),
                (0.99, Duration::from_secs_f64(p99.max(p50))),
            ],
            miss_rate,
            Some(&[(1.0, miss_latency)]),
            SUCCESS_BUCKETS,
        )?;
        Ok(out)
    }

    fn flow_pattern(&self, method: &str, _in_rate: f64) -> ComponentResult<FlowPattern> {
        let (_, can_miss) = self.method_profile(method)?;
        let success_rate = if can_miss { 1.0 - self.miss_rate() } else { 1.0 };
        Ok(FlowPattern::leaf(success_rate))
    }

    fn utilization(&self) -> Vec<UtilizationInfo> {
        vec![UtilizationInfo {
            resource_name: "pages".to_string(),
            utilization: 0.0,
            is_bottleneck: false,
            component_path: None,
        }]
    }

    fn params(&self) -> BTreeMap<String, ParamValue> {
        self.params.snapshot()
    }

    fn get_param(&self, name: &str) -> ComponentResult<ParamValue> {
        self.params
            .get(name)
            .ok_or_else(|| ComponentError::UnknownParameter {
                component: self.kind().to_string(),
                param: name.to_string(),
            })
    }

    fn set_param(&self, name: &str, value: ParamValue) -> ComponentResult<ParamValue> {
        if name == "MissRate" {
            let v = value.as_f64().ok_or_else(|| {
                ComponentError::InvalidParameter("MissRate must be numeric".to_string())
            })?;
            if !(0.0..=1.0).contains(&v) {
                return Err(ComponentError::InvalidParameter(format!(
                    "MissRate must be within [0, 1], got {}",
                    v
                )));
            }
        }
        self.params
            .set(name, value)
            .ok_or_else(|| ComponentError::UnknownParameter {
                component: self.kind().to_string(),
                param: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_outcomes::{availability, mean_latency};

    #[test]
    fn test_find_can_miss() {
        let index = IndexBehavior::new();
        let o = index.outcomes("Find").unwrap();
        assert!((o.total_weight() - 1.0).abs() < 1e-9);
        assert!((availability(&o) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_range_scales_with_selectivity() {
        let index = IndexBehavior::new();
        let point = mean_latency(&index.outcomes("Find").unwrap());
        let range = mean_latency(&index.outcomes("Range").unwrap());
        let scan = mean_latency(&index.outcomes("Scan").unwrap());
        assert!(range > point);
        assert!(scan > range);
    }

    #[test]
    fn test_insert_never_misses() {
        let index = IndexBehavior::new();
        let o = index.outcomes("Insert").unwrap();
        assert!((availability(&o) - 1.0).abs() < 1e-9);
    }
}
