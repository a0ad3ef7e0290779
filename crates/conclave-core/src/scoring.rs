//! Heuristic quality and confidence scoring.
//!
//! Scores are proxies, not judgments of prose quality. The orchestration
//! code only sees the [`ContentScorer`] trait, so a better scorer can be
//! dropped in without touching the session loop.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::RoleId;

/// Lowest quality a contribution may carry.
pub const MIN_QUALITY: f64 = 1.0;
/// Highest quality a contribution may carry.
pub const MAX_QUALITY: f64 = 10.0;
/// Lowest confidence a contribution may carry.
pub const MIN_CONFIDENCE: f64 = 0.1;
/// Highest confidence a contribution may carry.
pub const MAX_CONFIDENCE: f64 = 1.0;

/// Clamp a quality value into `[1, 10]`. NaN maps to the floor.
pub fn clamp_quality(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_QUALITY;
    }
    value.clamp(MIN_QUALITY, MAX_QUALITY)
}

/// Clamp a confidence value into `[0.1, 1.0]`. NaN maps to the floor.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_CONFIDENCE;
    }
    value.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

lazy_static! {
    /// Markdown headings, numbered steps and bullet items
    static ref STRUCTURE_PATTERN: Regex = Regex::new(
        r"(?m)^\s*(?:#{1,6}\s|\d+[.)]\s|[-*•]\s)"
    ).unwrap();

    /// Concrete engineering vocabulary
    static ref SPECIFICITY_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:because|therefore|trade-?off|latency|throughput|cost|risk|metric|benchmark|component|interface|constraint|requirement|step|phase|example|evidence|measure)\b"
    ).unwrap();

    /// Hedging language lowers confidence
    static ref HEDGE_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:maybe|perhaps|possibly|might|unclear|not sure|i think|it depends|uncertain|could be)\b"
    ).unwrap();

    /// Assertive language raises confidence
    static ref ASSERTIVE_PATTERN: Regex = Regex::new(
        r"(?i)\b(?:must|will|clearly|definitely|recommend|should|proven|always)\b"
    ).unwrap();
}

/// Raw score produced by a scorer, before role adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub quality: f64,
    pub confidence: f64,
}

impl Score {
    pub fn new(quality: f64, confidence: f64) -> Self {
        Self {
            quality: clamp_quality(quality),
            confidence: clamp_confidence(confidence),
        }
    }
}

/// Pluggable scoring strategy.
pub trait ContentScorer: Send + Sync {
    /// Score a contribution's content for a role.
    fn score(&self, role: RoleId, content: &str) -> Score;

    /// Name used in logs.
    fn name(&self) -> &str {
        "scorer"
    }
}

/// Per-role multipliers applied after scoring.
///
/// Synthesizer output is boosted because it integrates the others;
/// Catalyst output is discounted to reflect its exploratory nature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleAdjustment {
    pub quality: f64,
    pub confidence: f64,
}

impl RoleAdjustment {
    pub fn for_role(role: RoleId) -> Self {
        match role {
            RoleId::Architect => Self { quality: 1.05, confidence: 1.0 },
            RoleId::Catalyst => Self { quality: 0.95, confidence: 0.9 },
            RoleId::Synthesizer => Self { quality: 1.1, confidence: 1.05 },
            RoleId::Evaluator => Self { quality: 1.0, confidence: 1.1 },
        }
    }

    /// Apply the multipliers and clamp into the contribution ranges.
    pub fn apply(&self, score: Score) -> Score {
        Score::new(score.quality * self.quality, score.confidence * self.confidence)
    }
}

/// Length, structure and vocabulary heuristics.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    /// Word count at which the length component saturates
    pub target_words: usize,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self { target_words: 250 }
    }
}

impl HeuristicScorer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentScorer for HeuristicScorer {
    fn score(&self, role: RoleId, content: &str) -> Score {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Score::new(MIN_QUALITY, MIN_CONFIDENCE);
        }

        let words = trimmed.split_whitespace().count();
        let length = (words as f64 / self.target_words.max(1) as f64).min(1.0);
        let structure = (STRUCTURE_PATTERN.find_iter(trimmed).count() as f64 / 5.0).min(1.0);
        let specificity = (SPECIFICITY_PATTERN.find_iter(trimmed).count() as f64 / 6.0).min(1.0);
        let focus = role_focus(role, trimmed);

        // Base 3.0 plus up to 7 points from the four components
        let quality = 3.0 + 2.5 * length + 1.5 * structure + 1.5 * specificity + 1.5 * focus;

        let hedges = HEDGE_PATTERN.find_iter(trimmed).count() as f64;
        let assertions = ASSERTIVE_PATTERN.find_iter(trimmed).count() as f64;
        let confidence = 0.55 + 0.05 * assertions.min(5.0) - 0.06 * hedges.min(6.0) + 0.15 * length;

        Score::new(quality, confidence)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Share of a role's expertise vocabulary present in the content.
fn role_focus(role: RoleId, content: &str) -> f64 {
    let vocabulary: &[&str] = match role {
        RoleId::Architect => &["architecture", "component", "design", "scal", "interface", "system"],
        RoleId::Catalyst => &["alternative", "unconventional", "idea", "challenge", "novel", "what if"],
        RoleId::Synthesizer => &["combine", "integrat", "common", "together", "unified", "consensus"],
        RoleId::Evaluator => &["risk", "evaluat", "weakness", "strength", "criteria", "test"],
    };
    let lower = content.to_lowercase();
    let hits = vocabulary.iter().filter(|term| lower.contains(*term)).count();
    hits as f64 / vocabulary.len() as f64
}
