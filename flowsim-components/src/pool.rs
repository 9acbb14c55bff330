//! Fixed-size resource pool behavior
//!
//! Blocking probability follows the Erlang-B recursion over the offered
//! load `ArrivalRate * HoldTime`. Blocked acquisitions fail after the
//! acquire timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use flowsim_outcomes::{AccessResult, Outcomes};

use crate::behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
use crate::error::{ComponentError, ComponentResult};

/// Pool component: `Acquire`, `Release`, `Submit` against `Size` slots
pub struct PoolBehavior {
    params: ParamEnv,
}

impl PoolBehavior {
    pub fn new() -> Self {
        Self {
            params: ParamEnv::new(&[
                ("Size", ParamValue::Int(10)),
                ("HoldTime", ParamValue::Float(0.005)),
                ("AcquireTimeout", ParamValue::Float(1.0)),
                ("ArrivalRate", ParamValue::Float(0.0)),
            ]),
        }
    }

    fn size(&self) -> usize {
        self.params.f64("Size", 10.0).max(1.0) as usize
    }

    fn offered_load(&self) -> f64 {
        let lambda = self.params.f64("ArrivalRate", 0.0).max(0.0);
        lambda * self.params.f64("HoldTime", 0.005).max(0.0)
    }

    /// Erlang-B blocking probability for the current offered load
    fn blocking_probability(&self) -> f64 {
        let a = self.offered_load();
        if a <= 0.0 {
            return 0.0;
        }
        let mut b = 1.0;
        for k in 1..=self.size() {
            b = a * b / (k as f64 + a * b);
        }
        b
    }

    fn acquire_outcomes(&self, hold: bool) -> ComponentResult<Outcomes<AccessResult>> {
        let blocking = self.blocking_probability();
        let hold_time = Duration::from_secs_f64(self.params.f64("HoldTime", 0.005).max(0.0));
        let timeout = Duration::from_secs_f64(self.params.f64("AcquireTimeout", 1.0).max(0.0));
        let success_latency = if hold { hold_time } else { Duration::ZERO };

        let mut out = Outcomes::new();
        if blocking < 1.0 {
            out.add(1.0 - blocking, AccessResult::ok(success_latency))?;
        }
        if blocking > 0.0 {
            out.add(blocking, AccessResult::failed(timeout))?;
        }
        Ok(out)
    }
}

impl Default for PoolBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBehavior for PoolBehavior {
    fn kind(&self) -> &'static str {
        "pool"
    }

    fn methods(&self) -> Vec<String> {
        vec![
            "Acquire".to_string(),
            "Release".to_string(),
            "Submit".to_string(),
        ]
    }

    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>> {
        match method {
            "Acquire" => self.acquire_outcomes(false),
            "Submit" => self.acquire_outcomes(true),
            "Release" => {
                let mut out = Outcomes::new();
                out.add(1.0, AccessResult::ok(Duration::ZERO))?;
                Ok(out)
            }
            _ => Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn flow_pattern(&self, method: &str, _in_rate: f64) -> ComponentResult<FlowPattern> {
        if !self.methods().iter().any(|m| m == method) {
            return Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            });
        }
        let success_rate = if method == "Release" {
            1.0
        } else {
            1.0 - self.blocking_probability()
        };
        Ok(FlowPattern::leaf(success_rate))
    }

    fn utilization(&self) -> Vec<UtilizationInfo> {
        let occupancy = self.offered_load() / self.size() as f64;
        vec![UtilizationInfo {
            resource_name: "slots".to_string(),
            utilization: occupancy,
            is_bottleneck: occupancy >= 0.8,
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
        if name == "Size" {
            let v = value.as_i64().ok_or_else(|| {
                ComponentError::InvalidParameter("Size must be an integer".to_string())
            })?;
            if v < 1 {
                return Err(ComponentError::InvalidParameter(format!(
                    "Size must be at least 1, got {}",
                    v
                )));
            }
        } else if let Some(v) = value.as_f64() {
            if v < 0.0 {
                return Err(ComponentError::InvalidParameter(format!(
                    "{} must be non-negative, got {}",
                    name, v
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
