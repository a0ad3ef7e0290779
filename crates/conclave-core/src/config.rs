//! Consensus engine configuration.

use serde::{Deserialize, Serialize};

use crate::roles::RoleSet;
use crate::CoreError;

/// Thresholds and budgets that drive a consensus session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Consensus bar for a quality-0 iteration
    pub min_consensus: f64,

    /// Consensus bar for a quality-10 iteration
    pub max_consensus: f64,

    /// Quality an iteration must reach before it can converge
    pub quality_threshold: f64,

    /// Iteration budget per session
    pub max_iterations: u32,

    /// Consensus samples inspected for stagnation
    pub stagnation_window: usize,

    /// Variance below which the window counts as flat
    pub stagnation_epsilon: f64,

    /// Catalyst weight multiplier during a breakthrough iteration
    pub breakthrough_boost: f64,

    /// Participating roles in evaluation order
    pub roles: RoleSet,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_consensus: 0.75,
            max_consensus: 0.90,
            quality_threshold: 7.5,
            max_iterations: 8,
            stagnation_window: 3,
            stagnation_epsilon: 0.001,
            breakthrough_boost: 1.5,
            roles: RoleSet::default(),
        }
    }
}

impl ConsensusConfig {
    /// Reject thresholds that would make convergence undefined.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("min_consensus", self.min_consensus),
            ("max_consensus", self.max_consensus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.min_consensus > self.max_consensus {
            return Err(CoreError::InvalidConfig(format!(
                "min_consensus ({}) exceeds max_consensus ({})",
                self.min_consensus, self.max_consensus
            )));
        }

        if !(0.0..=10.0).contains(&self.quality_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "quality_threshold must be within [0, 10], got {}",
                self.quality_threshold
            )));
        }

        if self.max_iterations == 0 {
            return Err(CoreError::InvalidConfig("max_iterations must be at least 1".into()));
        }

        if self.stagnation_window < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "stagnation_window must be at least 2, got {}",
                self.stagnation_window
            )));
        }

        if !self.stagnation_epsilon.is_finite() || self.stagnation_epsilon < 0.0 {
            return Err(CoreError::InvalidConfig(format!(
                "stagnation_epsilon must be a finite non-negative number, got {}",
                self.stagnation_epsilon
            )));
        }

        if !(self.breakthrough_boost > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "breakthrough_boost must be positive, got {}",
                self.breakthrough_boost
            )));
        }

        self.roles.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConsensusConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_consensus_bounds_rejected() {
        let config = ConsensusConfig {
            min_consensus: 0.95,
            max_consensus: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = ConsensusConfig {
            max_consensus: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = ConsensusConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_single_sample_stagnation_window_rejected() {
        for window in [0, 1] {
            let config = ConsensusConfig {
                stagnation_window: window,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("stagnation_window"));
        }
    }

    #[test]
    fn test_bad_stagnation_epsilon_rejected() {
        for epsilon in [-0.001, f64::NAN, f64::INFINITY] {
            let config = ConsensusConfig {
                stagnation_epsilon: epsilon,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("stagnation_epsilon"));
        }

        let zero = ConsensusConfig {
            stagnation_epsilon: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ConsensusConfig = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.min_consensus, 0.75);
        assert_eq!(config.roles.len(), 4);
    }
}
