//! Fallback ladder tried once every provider has failed for a role.

use conclave_core::FallbackStrategy;
use serde::{Deserialize, Serialize};

/// Fallback configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Rungs in the order they are tried
    pub ladder: Vec<FallbackStrategy>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            ladder: FallbackLadder::default().into_strategies(),
        }
    }
}

impl FallbackConfig {
    /// Only post-provider strategies may appear on the ladder.
    pub fn validate(&self) -> Result<(), String> {
        if self.ladder.is_empty() {
            return Err("fallback ladder must not be empty".to_string());
        }
        for strategy in &self.ladder {
            if !FallbackLadder::is_rung(*strategy) {
                return Err(format!("'{strategy}' cannot be used as a fallback rung"));
            }
        }
        Ok(())
    }

    pub fn ladder(&self) -> FallbackLadder {
        FallbackLadder {
            rungs: self.ladder.clone(),
        }
    }
}

/// Ordered fallback rungs.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackLadder {
    rungs: Vec<FallbackStrategy>,
}

impl FallbackLadder {
    pub fn new() -> Self {
        Self { rungs: Vec::new() }
    }

    /// Append a rung.
    pub fn then(mut self, strategy: FallbackStrategy) -> Self {
        self.rungs.push(strategy);
        self
    }

    fn is_rung(strategy: FallbackStrategy) -> bool {
        matches!(
            strategy,
            FallbackStrategy::SimplifiedPrompt
                | FallbackStrategy::SimilarCache
                | FallbackStrategy::RuleBased
        )
    }

    pub fn rungs(&self) -> &[FallbackStrategy] {
        &self.rungs
    }

    /// Whether the ladder ends in a rung that cannot fail.
    pub fn always_succeeds(&self) -> bool {
        self.rungs.contains(&FallbackStrategy::RuleBased)
    }

    pub fn into_strategies(self) -> Vec<FallbackStrategy> {
        self.rungs
    }
}

impl Default for FallbackLadder {
    /// Simplified prompt, then similar cache, then rule-based.
    fn default() -> Self {
        Self::new()
            .then(FallbackStrategy::SimplifiedPrompt)
            .then(FallbackStrategy::SimilarCache)
            .then(FallbackStrategy::RuleBased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder() {
        let ladder = FallbackLadder::default();
        assert_eq!(
            ladder.rungs(),
            &[
                FallbackStrategy::SimplifiedPrompt,
                FallbackStrategy::SimilarCache,
                FallbackStrategy::RuleBased
            ]
        );
        assert!(ladder.always_succeeds());
        assert!(FallbackConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_rung_strategies() {
        let config = FallbackConfig {
            ladder: vec![FallbackStrategy::ProviderFallback],
        };
        assert!(config.validate().is_err());

        let config = FallbackConfig {
            ladder: vec![FallbackStrategy::RuleBased, FallbackStrategy::RoleRecovery],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_ladder() {
        let config = FallbackConfig { ladder: vec![] };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ladder_without_rule_based_can_fail() {
        let config = FallbackConfig {
            ladder: vec![FallbackStrategy::SimilarCache],
        };
        assert!(config.validate().is_ok());
        assert!(!config.ladder().always_succeeds());
    }
}
