use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceiling for every configured priority. Escalations are generated above it, so no
/// configured candidate can tie with or outrank them.
pub const MAX_CONFIGURED_PRIORITY: i64 = i64::MAX / 2;

fn default_stall_window() -> usize {
    3
}

fn default_low_trust_threshold() -> f64 {
    0.6
}

fn default_max_interruption_depth() -> usize {
    4
}

fn default_navigator_timeout_ms() -> u64 {
    30_000
}

fn default_continue_base_priority() -> i64 {
    100
}

fn default_inject_flow_priority() -> i64 {
    10
}

fn default_hard_contradiction_penalty() -> f64 {
    0.5
}

fn default_soft_mismatch_penalty() -> f64 {
    0.3
}

fn default_missing_test_evidence_penalty() -> f64 {
    0.3
}

/// Confidence penalties applied by the forensic comparator, one per discrepancy kind.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PenaltyWeights {
    #[serde(default = "default_hard_contradiction_penalty")]
    pub hard_contradiction: f64,
    #[serde(default = "default_soft_mismatch_penalty")]
    pub soft_mismatch: f64,
    #[serde(default = "default_missing_test_evidence_penalty")]
    pub missing_test_evidence: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            hard_contradiction: default_hard_contradiction_penalty(),
            soft_mismatch: default_soft_mismatch_penalty(),
            missing_test_evidence: default_missing_test_evidence_penalty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default = "default_stall_window")]
    pub stall_window: usize,
    #[serde(default = "default_low_trust_threshold")]
    pub low_trust_threshold: f64,
    #[serde(default = "default_max_interruption_depth")]
    pub max_interruption_depth: usize,
    #[serde(default = "default_navigator_timeout_ms")]
    pub navigator_timeout_ms: u64,
    #[serde(default)]
    pub penalties: PenaltyWeights,
    #[serde(default = "default_continue_base_priority")]
    pub continue_base_priority: i64,
    #[serde(default = "default_inject_flow_priority")]
    pub inject_flow_priority: i64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            stall_window: default_stall_window(),
            low_trust_threshold: default_low_trust_threshold(),
            max_interruption_depth: default_max_interruption_depth(),
            navigator_timeout_ms: default_navigator_timeout_ms(),
            penalties: PenaltyWeights::default(),
            continue_base_priority: default_continue_base_priority(),
            inject_flow_priority: default_inject_flow_priority(),
        }
    }
}

impl RoutingConfig {
    pub fn navigator_timeout(&self) -> Duration {
        Duration::from_millis(self.navigator_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stall_window == 0 {
            return Err(ConfigError::Routing(
                "`stall_window` must be >= 1".to_string(),
            ));
        }
        if self.max_interruption_depth == 0 {
            return Err(ConfigError::Routing(
                "`max_interruption_depth` must be >= 1".to_string(),
            ));
        }
        if self.navigator_timeout_ms == 0 {
            return Err(ConfigError::Routing(
                "`navigator_timeout_ms` must be >= 1".to_string(),
            ));
        }
        check_unit_interval("low_trust_threshold", self.low_trust_threshold)?;
        check_unit_interval("penalties.hard_contradiction", self.penalties.hard_contradiction)?;
        check_unit_interval("penalties.soft_mismatch", self.penalties.soft_mismatch)?;
        check_unit_interval(
            "penalties.missing_test_evidence",
            self.penalties.missing_test_evidence,
        )?;
        for (field, value) in [
            ("continue_base_priority", self.continue_base_priority),
            ("inject_flow_priority", self.inject_flow_priority),
        ] {
            if !(-MAX_CONFIGURED_PRIORITY..=MAX_CONFIGURED_PRIORITY).contains(&value) {
                return Err(ConfigError::Routing(format!(
                    "`{field}` must be within +/-{MAX_CONFIGURED_PRIORITY}, got {value}"
                )));
            }
        }
        if self.inject_flow_priority >= self.continue_base_priority {
            return Err(ConfigError::Routing(
                "`inject_flow_priority` must be below `continue_base_priority`".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::Routing(format!(
        "`{field}` must be within [0.0, 1.0], got {value}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_routing_section_uses_conservative_defaults() {
        let config: RoutingConfig = serde_yaml::from_str("{}").expect("parse routing");
        assert_eq!(config, RoutingConfig::default());
        assert_eq!(config.stall_window, 3);
        assert_eq!(config.max_interruption_depth, 4);
        assert_eq!(config.penalties.hard_contradiction, 0.5);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn validation_rejects_out_of_range_threshold_and_zero_window() {
        let config: RoutingConfig =
            serde_yaml::from_str("low_trust_threshold: 1.5").expect("parse routing");
        let err = config.validate().expect_err("threshold above 1 must fail");
        assert!(err.to_string().contains("low_trust_threshold"));

        let config: RoutingConfig = serde_yaml::from_str("stall_window: 0").expect("parse routing");
        let err = config.validate().expect_err("zero window must fail");
        assert!(err.to_string().contains("stall_window"));
    }

    #[test]
    fn validation_rejects_priorities_beyond_the_configured_ceiling() {
        let config = RoutingConfig {
            continue_base_priority: i64::MAX,
            ..RoutingConfig::default()
        };
        let err = config.validate().expect_err("unbounded base priority must fail");
        assert!(err.to_string().contains("continue_base_priority"));

        let config = RoutingConfig {
            inject_flow_priority: i64::MIN,
            ..RoutingConfig::default()
        };
        let err = config.validate().expect_err("unbounded inject priority must fail");
        assert!(err.to_string().contains("inject_flow_priority"));

        let config = RoutingConfig {
            continue_base_priority: MAX_CONFIGURED_PRIORITY,
            ..RoutingConfig::default()
        };
        config.validate().expect("ceiling itself is allowed");
    }

    #[test]
    fn unknown_routing_fields_are_rejected() {
        let err = serde_yaml::from_str::<RoutingConfig>("stall_windw: 3")
            .expect_err("typo must fail parsing");
        assert!(err.to_string().contains("unknown field"));
    }
}
