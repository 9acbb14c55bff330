//! Network link behavior
//!
//! Base latency plus jitter spread across three buckets; a loss fraction
//! fails at the worst-case latency.

use std::collections::BTreeMap;
use std::time::Duration;

use flowsim_outcomes::{AccessResult, Outcomes};

use crate::behavior::{ComponentBehavior, FlowPattern, ParamEnv, ParamValue, UtilizationInfo};
use crate::error::{ComponentError, ComponentResult};

/// Jitter spread: (weight share, fraction of jitter added to base)
const JITTER_SHAPE: [(f64, f64); 3] = [(0.5, 0.0), (0.3, 0.5), (0.2, 1.0)];

/// Link component: `Transfer` and `Send` over a lossy latency profile
pub struct LinkBehavior {
    params: ParamEnv,
}

impl LinkBehavior {
    pub fn new() -> Self {
        Self {
            params: ParamEnv::new(&[
                ("BaseLatency", ParamValue::Float(0.001)),
                ("Jitter", ParamValue::Float(0.0005)),
                ("LossRate", ParamValue::Float(0.001)),
            ]),
        }
    }

    fn loss_rate(&self) -> f64 {
        self.params.f64("LossRate", 0.001).clamp(0.0, 1.0)
    }
}

impl Default for LinkBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentBehavior for LinkBehavior {
    fn kind(&self) -> &'static str {
        "link"
    }

    fn methods(&self) -> Vec<String> {
        vec!["Transfer".to_string(), "Send".to_string()]
    }

    fn outcomes(&self, method: &str) -> ComponentResult<Outcomes<AccessResult>> {
        if !self.methods().iter().any(|m| m == method) {
            return Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            });
        }
        let base = self.params.f64("BaseLatency", 0.001).max(0.0);
        let jitter = self.params.f64("Jitter", 0.0005).max(0.0);
        let loss = self.loss_rate();

        let mut out = Outcomes::new();
        if loss < 1.0 {
            for (share, frac) in JITTER_SHAPE {
                out.add(
                    (1.0 - loss) * share,
                    AccessResult::ok(Duration::from_secs_f64(base + jitter * frac)),
                )?;
            }
        }
        if loss > 0.0 {
            out.add(
                loss,
                AccessResult::failed(Duration::from_secs_f64(base + jitter)),
            )?;
        }
        Ok(out)
    }

    fn flow_pattern(&self, method: &str, _in_rate: f64) -> ComponentResult<FlowPattern> {
        if !self.methods().iter().any(|m| m == method) {
            return Err(ComponentError::UnknownMethod {
                component: self.kind().to_string(),
                method: method.to_string(),
            });
        }
        Ok(FlowPattern::leaf(1.0 - self.loss_rate()))
    }

    fn utilization(&self) -> Vec<UtilizationInfo> {
        vec![UtilizationInfo {
            resource_name: "bandwidth".to_string(),
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
        if name == "LossRate" {
            let v = value.as_f64().ok_or_else(|| {
                ComponentError::InvalidParameter("LossRate must be numeric".to_string())
            })?;
            if !(0.0..=1.0).contains(&v) {
                return Err(ComponentError::InvalidParameter(format!(
                    "LossRate must be within [0, 1], got {}",
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
    fn test_transfer_availability_tracks_loss() {
        let link = LinkBehavior::new();
        link.set_param("LossRate", ParamValue::Float(0.02)).unwrap();
        let o = link.outcomes("Transfer").unwrap();
        assert!((o.total_weight() - 1.0).abs() < 1e-9);
        assert!((availability(&o) - 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_widens_latency_spread() {
        let link = LinkBehavior::new();
        let o = link.outcomes("Send").unwrap();
        let ok: Vec<_> = o.iter().filter(|b| b.value.success).collect();
        assert_eq!(ok.len(), 3);
        assert!(ok[2].value.latency > ok[0].value.latency);
    }
}
