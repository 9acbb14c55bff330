//! In-memory cache behavior
//!
//! Hit ratio and the two latency tiers are parameters. A `Read` succeeds
//! iff it hits, so callers can branch on the result; a miss is not a
//! system failure, it is the else-path of whoever asked.

use std::collections::BTreeMap;
use std::time::Duration;

use flowsim_outcomes::{AccessResult, Outcomes};

use crate::behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
use crate::error::{ComponentError, ComponentResult};

/// Cache component: `Read` and `Write` with a hit/miss latency split
pub struct CacheBehavior {
    params: ParamEnv,
}

impl CacheBehavior {
    pub fn new() -> Self {
        Self {
            params: ParamEnv::new(&[
                ("HitRate", ParamValue::Float(0.8)),
                ("HitLatency", ParamValue::Float(0.001)),
                ("MissLatency", ParamValue::Float(0.010)),
            ]),
        }
    }

    fn hit_rate(&self) -> f64 {
        self.params.f64("HitRate", 0.8).clamp(0.0, 1.0)
    }
}

impl Default for CacheBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBehavior for CacheBehavior {
    fn kind(&self) -> &'static str {
        "cache"
    }

    fn methods(&self) -> Vec<String> {
        vec!["Read".to_string(), "Write".to_string()]
    }

    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>> {
        let hit_rate = self.hit_rate();
        let hit_latency = Duration::from_secs_f64(self.params.f64("HitLatency", 0.001).max(0.0));
        let miss_latency = Duration::from_secs_f64(self.params.f64("MissLatency", 0.010).max(0.0));
        let mut out = Outcomes::new();
        match method {
            "Read" => {
                if hit_rate > 0.0 {
                    out.add(hit_rate, AccessResult::ok(hit_latency))?;
                }
                if hit_rate < 1.0 {
                    out.add(1.0 - hit_rate, AccessResult::failed(miss_latency))?;
                }
            }
            "Write" => {
                out.add(1.0, AccessResult::ok(miss_latency))?;
            }
            _ => {
                return Err(ComponentError::UnknownMethod {
                    component: self.kind().to_string(),
                    method: method.to_string(),
                })
            }
        }
        Ok(out)
    }

    fn flow_pattern(&self, method: &str, _in_rate: f64) -> ComponentResult<FlowPattern> {
        match method {
            "Read" => Ok(FlowPattern::leaf(self.hit_rate())),
            "Write" => Ok(FlowPattern::leaf(1.0)),
            _ => Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn utilization(&self) -> Vec<UtilizationInfo> {
        vec![UtilizationInfo {
            resource_name: "entries".to_string(),
            utilization: self.hit_rate(),
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
        if name == "HitRate" {
            let v = value.as_f64().ok_or_else(|| {
                ComponentError::InvalidParameter("HitRate must be numeric".to_string())
            })?;
            if !(0.0..=1.0).contains(&v) {
                return Err(ComponentError::InvalidParameter(format!(
                    "HitRate must be within [0, 1], got {}",
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
