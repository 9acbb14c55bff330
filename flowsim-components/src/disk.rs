//! Disk behavior
//!
//! Latencies come from a two-point percentile profile; writes pay a
//! constant multiple of the read profile, seeks a fraction of it.

use std::collections::BTreeMap;
use std::time::Duration;

use flowsim_outcomes::{from_percentiles, AccessResult, Outcomes};

use crate::behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
use crate::error::{ComponentError, ComponentResult};

const SUCCESS_BUCKETS: usize = 4;

/// Disk component: `Read`, `Write`, `Seek` over a percentile latency profile
pub struct DiskBehavior {
    params: ParamEnv,
}

impl DiskBehavior {
    pub fn new() -> Self {
        Self {
            params: ParamEnv::new(&[
                ("P50Latency", ParamValue::Float(0.005)),
                ("P99Latency", ParamValue::Float(0.020)),
                ("FailureRate", ParamValue::Float(0.0)),
            ]),
        }
    }

    fn failure_rate(&self) -> f64 {
        self.params.f64("FailureRate", 0.0).clamp(0.0, 1.0)
    }

    fn method_scale(&self, method: &str) -> ComponentResult<f64> {
        match method {
            "Read" => Ok(1.0),
            "Write" => Ok(2.0),
            "Seek" => Ok(0.5),
            _ => Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            }),
        }
    }
}

impl Default for DiskBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBehavior for DiskBehavior {
    fn kind(&self) -> &'static str {
        "disk"
    }

    fn methods(&self) -> Vec<String> {
        vec!["Read".to_string(), "Write".to_string(), "Seek".to_string()]
    }

    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>> {
        let scale = self.method_scale(method)?;
        let p50 = self.params.f64("P50Latency", 0.005).max(0.0) * scale;
        let p99 = self.params.f64("P99Latency", 0.020).max(0.0) * scale;
        let fail_rate = self.failure_rate();
        let fail_latency = Duration::from_secs_f64(p99);
        let out = from_percentiles(
            &[
                (0.5, Duration::from_secs_f64(p50)),
                (0.99, Duration::from_secs_f64(p99.max(p50))),
            ],
            fail_rate,
            Some(&[(1.0, fail_latency)]),
            SUCCESS_BUCKETS,
        )?;
        Ok(out)
    }

    fn flow_pattern(&self, method: &str, _in_rate: f64) -> ComponentResult<FlowPattern> {
        self.method_scale(method)?;
        Ok(FlowPattern::leaf(1.0 - self.failure_rate()))
    }

    fn utilization(&self) -> Vec<UtilizationInfo> {
        vec![UtilizationInfo {
            resource_name: "iops".to_string(),
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
        if name == "FailureRate" {
            let v = value.as_f64().ok_or_else(|| {
                ComponentError::InvalidParameter("FailureRate must be numeric".to_string())
            })?;
            if !(0.0..=1.0).contains(&v) {
                return Err(ComponentError::InvalidParameter(format!(
                    "FailureRate must be within [0, 1], got {}",
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
    use flowsim_outcomes::availability;

    #[test]
    fn test_read_outcomes_weight_and_availability() {
        let disk = DiskBehavior::new();
        disk.set_param("FailureRate", ParamValue::Float(0.05)).unwrap();
        let o = disk.outcomes("Read").unwrap();
        assert!((o.total_weight() - 1.0).abs() < 1e-9);
        assert!((availability(&o) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_write_slower_than_read() {
        let disk = DiskBehavior::new();
        let read = flowsim_outcomes::mean_latency(&disk.outcomes("Read").unwrap());
        let write = flowsim_outcomes::mean_latency(&disk.outcomes("Write").unwrap());
        assert!(write > read);
    }
}
