//! Bounded-server queue behavior
//!
//! Service latency follows an M/M/c-style approximation: expected queueing
//! delay from the Sakasegawa formula, exponential sojourn quantiles for the
//! bucket shape. The solver feeds observed arrival rate back through the
//! `ArrivalRate` parameter, so occupancy follows traffic.

use std::collections::BTreeMap;
use std::time::Duration;

use flowsim_outcomes::{AccessResult, Outcomes};
use tracing::warn;

use crate::behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
use crate::error::{ComponentError, ComponentResult};

const SOJOURN_BUCKETS: usize = 4;
/// Occupancy used for latency math when the queue is driven past saturation.
const SATURATED_RHO: f64 = 0.95;

/// Queue component: `Enqueue`, `Dequeue`, `Process` over c servers
pub struct QueueBehavior {
    params: ParamEnv,
}

impl QueueBehavior {
    pub fn new() -> Self {
        Self {
            params: ParamEnv::new(&[
                ("ArrivalRate", ParamValue::Float(0.0)),
                ("ServiceTime", ParamValue::Float(0.010)),
                ("Servers", ParamValue::Int(1)),
            ]),
        }
    }

    fn servers(&self) -> f64 {
        self.params.f64("Servers", 1.0).max(1.0)
    }

    fn service_time(&self) -> f64 {
        self.params.f64("ServiceTime", 0.010).max(1e-9)
    }

    fn occupancy(&self) -> f64 {
        let lambda = self.params.f64("ArrivalRate", 0.0).max(0.0);
        lambda * self.service_time() / self.servers()
    }

    /// Expected queueing delay (Sakasegawa's M/M/c approximation)
    fn expected_wait(&self, rho: f64) -> f64 {
        let c = self.servers();
        let s = self.service_time();
        if rho <= 0.0 {
            return 0.0;
        }
        let exponent = (2.0 * (c + 1.0)).sqrt() - 1.0;
        s * rho.powf(exponent) / (c * (1.0 - rho))
    }

    fn sojourn_outcomes(&self, served_fraction: f64) -> ComponentResult<Outcomes<AccessResult>> {
        let rho = self.occupancy().min(SATURATED_RHO);
        let mean_sojourn = self.expected_wait(rho) + self.service_time();
        let mut out = Outcomes::new();
        let weight = served_fraction / SOJOURN_BUCKETS as f64;
        for i in 0..SOJOURN_BUCKETS {
            let center = (i as f64 + 0.5) / SOJOURN_BUCKETS as f64;
            // exponential sojourn quantile at the bucket center
            let latency = -mean_sojourn * (1.0 - center).ln();
            out.add(weight, AccessResult::ok(Duration::from_secs_f64(latency)))?;
        }
        if served_fraction < 1.0 {
            let shed_latency = Duration::from_secs_f64(self.service_time() * 10.0);
            out.add(1.0 - served_fraction, AccessResult::failed(shed_latency))?;
        }
        Ok(out)
    }

    fn served_fraction(&self) -> f64 {
        let rho = self.occupancy();
        if rho > 1.0 {
            1.0 / rho
        } else {
            1.0
        }
    }
}

impl Default for QueueBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBehavior for QueueBehavior {
    fn kind(&self) -> &'static str {
        "queue"
    }

    fn methods(&self) -> Vec<String> {
        vec![
            "Enqueue".to_string(),
            "Dequeue".to_string(),
            "Process".to_string(),
        ]
    }

    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>> {
        match method {
            "Enqueue" => {
                let mut out = Outcomes::new();
                let served = self.served_fraction();
                out.add(served, AccessResult::ok(Duration::ZERO))?;
                if served < 1.0 {
                    out.add(1.0 - served, AccessResult::failed(Duration::ZERO))?;
                }
                Ok(out)
            }
            "Dequeue" | "Process" => self.sojourn_outcomes(self.served_fraction()),
            _ => Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn flow_pattern(&self, method: &str, in_rate: f64) -> ComponentResult<FlowPattern> {
        if !self.methods().iter().any(|m| m == method) {
            return Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            });
        }
        let capacity = self.servers() / self.service_time();
        let success_rate = if in_rate > capacity && in_rate > 0.0 {
            capacity / in_rate
        } else {
            1.0
        };
        Ok(FlowPattern::leaf(success_rate))
    }

    fn utilization(&self) -> Vec<UtilizationInfo> {
        let rho = self.occupancy();
        vec![UtilizationInfo {
            resource_name: "servers".to_string(),
            utilization: rho,
            is_bottleneck: rho >= 0.8,
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
        if let Some(v) = value.as_f64() {
            if v < 0.0 {
                return Err(ComponentError::InvalidParameter(format!(
                    "{} must be non-negative, got {}",
                    name, v
                )));
            }
        }
        let old = self
            .params
            .set(name, value)
            .ok_or_else(|| ComponentError::UnknownParameter {
                component: self.kind().to_string(),
                param: name.to_string(),
            })?;
        let rho = self.occupancy();
        if rho >= 1.0 {
            warn!(kind = self.kind(), occupancy = rho, "queue driven past saturation");
        }
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsim_outcomes::{availability, mean_latency};

    #[test]
    fn test_idle_queue_sojourn_near_service_time() {
        let q = QueueBehavior::new();
        let o = q.outcomes("Process").unwrap();
        assert!((availability(&o) - 1.0).abs() < 1e-9);
        let mean = mean_latency(&o).as_secs_f64();
        // exponential quantile sampling at 4 centers sits near the mean
        assert!(mean > 0.005 && mean < 0.020, "mean {}", mean);
    }

    #[test]
    fn test_loaded_queue_waits_longer() {
        let q = QueueBehavior::new();
        let idle = mean_latency(&q.outcomes("Process").unwrap());
        q.set_param("ArrivalRate", ParamValue::Float(90.0)).unwrap();
        let loaded = mean_latency(&q.outcomes("Process").unwrap());
        assert!(loaded > idle);
        let util = &q.utilization()[0];
        assert!((util.utilization - 0.9).abs() < 1e-9);
        assert!(util.is_bottleneck);
    }

    #[test]
    fn test_oversaturated_queue_sheds_load() {
        let q = QueueBehavior::new();
        q.set_param("ArrivalRate", ParamValue::Float(200.0)).unwrap();
        let o = q.outcomes("Process").unwrap();
        assert!((availability(&o) - 0.5).abs() < 1e-9);
        let pattern = q.flow_pattern("Process", 200.0).unwrap();
        assert!((pattern.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_negative_rate_rejected() {
        let q = QueueBehavior::new();
        assert!(q.set_param("ArrivalRate", ParamValue::Float(-1.0)).is_err());
    }
}
