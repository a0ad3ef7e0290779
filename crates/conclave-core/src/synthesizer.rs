//! Synthesizer: folds a finished session into its final [`Solution`].
//!
//! Policy:
//! 1. The source is the iteration with the highest quality
//! 2. Ties go to the earliest iteration
//! 3. Contributions are laid out in role evaluation order, one section each

use crate::types::{Iteration, Solution};

/// Builds the final solution from sealed iterations.
#[derive(Debug, Clone, Default)]
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Best-quality iteration; the first maximum wins.
    pub fn best_iteration<'a>(&self, iterations: &'a [Iteration]) -> Option<&'a Iteration> {
        iterations.iter().fold(None, |best: Option<&Iteration>, it| match best {
            Some(b) if b.metrics.quality >= it.metrics.quality => Some(b),
            _ => Some(it),
        })
    }

    /// Synthesize a solution, or `None` when no iteration was sealed.
    pub fn synthesize(&self, iterations: &[Iteration]) -> Option<Solution> {
        let best = self.best_iteration(iterations)?;

        let mut content = String::new();
        for contribution in &best.contributions {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(&format!("## {}\n{}", contribution.role, contribution.content.trim()));
        }

        Some(Solution {
            iteration: best.number,
            content,
            quality: best.metrics.quality,
            consensus: best.metrics.consensus,
            confidence: weighted_confidence(best),
            contributors: best.contributions.iter().map(|c| c.role).collect(),
        })
    }
}

fn weighted_confidence(iteration: &Iteration) -> f64 {
    let weight_of = |role| {
        iteration
            .weights
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, w)| *w)
            .unwrap_or(1.0)
    };

    let (sum, weights) = iteration.contributions.iter().fold((0.0, 0.0), |(s, ws), c| {
        let w = weight_of(c.role);
        (s + c.confidence * w, ws + w)
    });

    if weights <= 0.0 {
        0.0
    } else {
        sum / weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Contribution, IterationMetrics, RoleId};
    use chrono::Utc;

    fn iteration(number: u32, quality: f64) -> Iteration {
        Iteration {
            number,
            started_at: Utc::now(),
            contributions: vec![
                Contribution::new(RoleId::Architect, format!("plan {number}"), quality, 0.8, None, "m"),
                Contribution::new(RoleId::Evaluator, "looks sound", quality, 0.6, None, "m"),
            ],
            metrics: IterationMetrics {
                quality,
                consensus: 0.5,
                diversity: 0.5,
                novelty: 0.7,
            },
            weights: vec![(RoleId::Architect, 1.0), (RoleId::Evaluator, 1.0)],
            breakthrough: false,
        }
    }

    #[test]
    fn test_first_maximum_wins() {
        let iterations = vec![iteration(1, 6.0), iteration(2, 8.0), iteration(3, 8.0)];
        let solution = Synthesizer::new().synthesize(&iterations).unwrap();
        assert_eq!(solution.iteration, 2);
        assert!(solution.content.contains("plan 2"));
    }

    #[test]
    fn test_empty_session_has_no_solution() {
        assert!(Synthesizer::new().synthesize(&[]).is_none());
    }

    #[test]
    fn test_solution_lists_contributors_in_order() {
        let solution = Synthesizer::new().synthesize(&[iteration(1, 7.0)]).unwrap();
        assert_eq!(solution.contributors, vec![RoleId::Architect, RoleId::Evaluator]);
        assert!((solution.confidence - 0.7).abs() < 1e-9);
        assert!(solution.content.starts_with("## architect"));
    }
}
