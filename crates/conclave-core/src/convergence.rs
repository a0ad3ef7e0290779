//! Convergence and stagnation detection.
//!
//! Both detectors are pure functions of the session's history. The
//! orchestrator feeds them after every sealed iteration and acts on the
//! result: stop on convergence, schedule a [`BreakthroughPlan`] on
//! stagnation.

use tracing::debug;

use crate::config::ConsensusConfig;
use crate::roles::RoleWeights;
use crate::types::RoleId;

/// Clause appended to the problem of the boosted role during a breakthrough.
pub const BREAKTHROUGH_CLAUSE: &str = "The discussion has plateaued. Consider unconventional \
approaches, challenge the shared assumptions and propose at least one direction nobody has \
raised yet.";

/// Outcome of a convergence check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceDecision {
    pub converged: bool,

    /// Consensus bar for the observed quality
    pub dynamic_threshold: f64,
}

/// Decides whether an iteration is good enough to stop.
///
/// The consensus bar scales with quality: a mediocre iteration needs only
/// `min_consensus`, a perfect one needs `max_consensus`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceDetector {
    pub min_consensus: f64,
    pub max_consensus: f64,
    pub quality_threshold: f64,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self {
            min_consensus: 0.75,
            max_consensus: 0.90,
            quality_threshold: 7.5,
        }
    }
}

impl ConvergenceDetector {
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self {
            min_consensus: config.min_consensus,
            max_consensus: config.max_consensus,
            quality_threshold: config.quality_threshold,
        }
    }

    /// `min + (max - min) * min(1, quality / 10)`
    pub fn dynamic_threshold(&self, quality: f64) -> f64 {
        let scale = (quality / 10.0).clamp(0.0, 1.0);
        self.min_consensus + (self.max_consensus - self.min_consensus) * scale
    }

    pub fn evaluate(&self, quality: f64, consensus: f64) -> ConvergenceDecision {
        let dynamic_threshold = self.dynamic_threshold(quality);
        let converged = quality >= self.quality_threshold && consensus >= dynamic_threshold;

        debug!(
            quality,
            consensus,
            dynamic_threshold,
            converged,
            "convergence check"
        );

        ConvergenceDecision {
            converged,
            dynamic_threshold,
        }
    }
}

/// Flags a consensus plateau over the most recent iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagnationDetector {
    /// Samples considered
    pub window: usize,

    /// Population variance below which the window counts as flat
    pub epsilon: f64,
}

impl Default for StagnationDetector {
    fn default() -> Self {
        Self {
            window: 3,
            epsilon: 0.001,
        }
    }
}

impl StagnationDetector {
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self {
            window: config.stagnation_window,
            epsilon: config.stagnation_epsilon,
        }
    }

    /// True when the last `window` consensus samples barely moved.
    pub fn is_stagnant(&self, history: &[f64]) -> bool {
        if self.window == 0 || history.len() < self.window {
            return false;
        }

        let recent = &history[history.len() - self.window..];
        population_variance(recent) < self.epsilon
    }
}

fn population_variance(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

/// One-iteration perturbation scheduled after stagnation.
///
/// The plan is consumed by the next iteration only. It never mutates the
/// role set, so the iteration after it runs on the original weights.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakthroughPlan {
    /// Role that gets the boost and the extra clause
    pub role: RoleId,

    /// Multiplier on that role's weight
    pub weight_factor: f64,

    /// Text appended to that role's problem statement
    pub clause: String,
}

impl BreakthroughPlan {
    pub fn new(weight_factor: f64) -> Self {
        Self {
            role: RoleId::Catalyst,
            weight_factor,
            clause: BREAKTHROUGH_CLAUSE.to_string(),
        }
    }

    /// Weights for the iteration this plan applies to.
    pub fn apply(&self, weights: RoleWeights) -> RoleWeights {
        weights.boost(self.role, self.weight_factor)
    }

    /// Problem statement as seen by `role` during the breakthrough iteration.
    pub fn problem_for(&self, role: RoleId, problem: &str) -> String {
        if role == self.role {
            format!("{problem}\n\n{}", self.clause)
        } else {
            problem.to_string()
        }
    }
}

impl Default for BreakthroughPlan {
    fn default() -> Self {
        Self::new(1.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleSet;

    #[test]
    fn test_high_quality_high_consensus_converges() {
        let decision = ConvergenceDetector::default().evaluate(9.0, 0.90);
        assert!((decision.dynamic_threshold - 0.885).abs() < 1e-9);
        assert!(decision.converged);
    }

    #[test]
    fn test_consensus_below_dynamic_bar_does_not_converge() {
        let decision = ConvergenceDetector::default().evaluate(8.0, 0.82);
        assert!((decision.dynamic_threshold - 0.87).abs() < 1e-9);
        assert!(!decision.converged);
    }

    #[test]
    fn test_low_quality_never_converges() {
        let decision = ConvergenceDetector::default().evaluate(7.0, 1.0);
        assert!(!decision.converged);
    }

    #[test]
    fn test_dynamic_threshold_caps_at_max() {
        let detector = ConvergenceDetector::default();
        assert!((detector.dynamic_threshold(15.0) - 0.90).abs() < 1e-9);
        assert!((detector.dynamic_threshold(0.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_flat_history_is_stagnant() {
        let detector = StagnationDetector::default();
        assert!(detector.is_stagnant(&[0.80, 0.801, 0.80]));
        assert!(detector.is_stagnant(&[0.2, 0.5, 0.80, 0.801, 0.80]));
    }

    #[test]
    fn test_moving_history_is_not_stagnant() {
        let detector = StagnationDetector::default();
        assert!(!detector.is_stagnant(&[0.5, 0.6, 0.7]));
    }

    #[test]
    fn test_plateau_scenarios() {
        let detector = StagnationDetector::default();
        assert!(detector.is_stagnant(&[0.81, 0.8105, 0.8098]));
        assert!(!detector.is_stagnant(&[0.5, 0.7, 0.9]));
    }

    #[test]
    fn test_short_history_is_not_stagnant() {
        let detector = StagnationDetector::default();
        assert!(!detector.is_stagnant(&[0.8, 0.8]));
    }

    #[test]
    fn test_breakthrough_is_iteration_scoped() {
        let roles = RoleSet::default();
        let plan = BreakthroughPlan::default();

        let boosted = plan.apply(roles.weights());
        assert!((boosted.get(RoleId::Catalyst) - 1.5).abs() < 1e-9);
        assert_eq!(boosted.get(RoleId::Architect), 1.2);

        // Next iteration derives weights from the untouched role set
        assert_eq!(roles.weights().get(RoleId::Catalyst), 1.0);
    }

    #[test]
    fn test_breakthrough_clause_only_for_catalyst() {
        let plan = BreakthroughPlan::default();
        assert!(plan.problem_for(RoleId::Catalyst, "p").contains("unconventional"));
        assert_eq!(plan.problem_for(RoleId::Architect, "p"), "p");
    }
}
