//! Per-iteration metrics.
//!
//! Consensus is the mean pairwise cosine similarity between TF-IDF vectors
//! of the contributions. The vectors are built over our own lexicon:
//!
//! - tokens are runs of `[a-z0-9]` (plus inner `-` and `'`), lower-cased
//! - English stop words and tokens shorter than three characters are dropped
//! - idf is smoothed: `ln((1 + n) / (1 + df)) + 1`, so terms shared by every
//!   contribution still count
//! - a small table of domain terms carries an extra weight, so agreement on
//!   substance outweighs agreement on filler
//!
//! Identical texts score 1.0 and texts with disjoint vocabularies score 0.0.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::roles::RoleWeights;
use crate::types::{Contribution, IterationMetrics};

lazy_static! {
    static ref TOKEN_PATTERN: Regex = Regex::new(r"[a-z0-9]+(?:['-][a-z0-9]+)*").unwrap();

    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her",
        "was", "one", "our", "out", "has", "have", "him", "his", "how", "its", "may", "new",
        "now", "own", "see", "who", "did", "get", "let", "say", "she", "too", "use", "that",
        "this", "with", "from", "they", "will", "would", "there", "their", "what", "about",
        "which", "when", "make", "like", "time", "just", "know", "take", "into", "your",
        "some", "could", "them", "than", "then", "these", "also", "should", "been", "were",
        "each", "more", "most", "such", "only", "over", "very", "where", "while", "those",
        "being", "both", "because", "between", "through", "during", "before", "after",
    ]
    .into_iter()
    .collect();

    /// Terms that carry more signal than their frequency suggests
    static ref TERM_WEIGHTS: HashMap<&'static str, f64> = [
        ("architecture", 1.5),
        ("security", 1.5),
        ("scalability", 1.5),
        ("performance", 1.4),
        ("reliability", 1.4),
        ("latency", 1.4),
        ("cost", 1.3),
        ("risk", 1.3),
        ("database", 1.3),
        ("cache", 1.3),
        ("api", 1.3),
        ("interface", 1.2),
        ("component", 1.2),
        ("testing", 1.2),
        ("deployment", 1.2),
        ("monitoring", 1.2),
    ]
    .into_iter()
    .collect();
}

/// Computes [`IterationMetrics`] from a sealed set of contributions.
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine;

impl MetricsEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute quality, consensus, diversity and novelty for one iteration.
    pub fn compute_iteration_metrics(
        &self,
        contributions: &[Contribution],
        weights: &RoleWeights,
    ) -> IterationMetrics {
        let quality = weighted_quality(contributions, weights);
        let texts: Vec<&str> = contributions.iter().map(|c| c.content.as_str()).collect();
        let consensus = self.consensus(&texts);

        IterationMetrics {
            quality,
            consensus,
            diversity: 1.0 - consensus,
            novelty: novelty(&texts),
        }
    }

    /// Mean pairwise cosine similarity. 1.0 for fewer than two texts.
    pub fn consensus(&self, texts: &[&str]) -> f64 {
        if texts.len() < 2 {
            return 1.0;
        }

        let vectors = tfidf_vectors(texts);
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                total += cosine(&vectors[i], &vectors[j]);
                pairs += 1;
            }
        }

        (total / pairs as f64).clamp(0.0, 1.0)
    }
}

/// Weighted mean quality, clamped to `[0, 10]`. 0 when there is nothing to weigh.
fn weighted_quality(contributions: &[Contribution], weights: &RoleWeights) -> f64 {
    let (sum, weight_sum) = contributions.iter().fold((0.0, 0.0), |(sum, ws), c| {
        let w = weights.get(c.role);
        (sum + c.quality * w, ws + w)
    });

    if weight_sum <= 0.0 {
        return 0.0;
    }
    (sum / weight_sum).clamp(0.0, 10.0)
}

/// Unique over total lower-cased whitespace tokens.
fn novelty(texts: &[&str]) -> f64 {
    let mut total = 0usize;
    let mut unique = HashSet::new();
    for text in texts {
        for token in text.split_whitespace() {
            total += 1;
            unique.insert(token.to_lowercase());
        }
    }

    if total == 0 {
        return 0.0;
    }
    unique.len() as f64 / total as f64
}

fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_PATTERN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= 3 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn tfidf_vectors(texts: &[&str]) -> Vec<HashMap<String, f64>> {
    let docs: Vec<HashMap<String, usize>> = texts
        .iter()
        .map(|text| {
            let mut counts = HashMap::new();
            for token in tokenize(text) {
                *counts.entry(token).or_insert(0) += 1;
            }
            counts
        })
        .collect();

    let mut df: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        for term in doc.keys() {
            *df.entry(term.as_str()).or_insert(0) += 1;
        }
    }

    let n = docs.len() as f64;
    docs.iter()
        .map(|doc| {
            let len: usize = doc.values().sum();
            doc.iter()
                .map(|(term, count)| {
                    let tf = *count as f64 / len as f64;
                    let doc_freq = df.get(term.as_str()).copied().unwrap_or(0) as f64;
                    let idf = ((1.0 + n) / (1.0 + doc_freq)).ln() + 1.0;
                    let boost = TERM_WEIGHTS.get(term.as_str()).copied().unwrap_or(1.0);
                    (term.clone(), tf * idf * boost)
                })
                .collect()
        })
        .collect()
}

/// Cosine similarity of two sparse vectors. Two empty vectors are identical.
fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
