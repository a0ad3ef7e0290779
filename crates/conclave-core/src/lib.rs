//! # conclave-core
//!
//! Deterministic engine behind multi-role consensus sessions.
//!
//! This crate answers, for a set of role contributions:
//! - How good is this iteration?
//! - How much do the roles agree?
//! - Should we stop, keep going, or shake things up?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same contributions always produce the same metrics
//! 2. **No I/O**: No network calls, no clocks beyond timestamps
//! 3. **Bounded**: Quality, confidence and similarity values are always clamped
//!
//! ## Example
//!
//! ```rust,ignore
//! use conclave_core::{ConvergenceDetector, MetricsEngine, RoleSet};
//!
//! let roles = RoleSet::default();
//! let metrics = MetricsEngine::new().compute_iteration_metrics(&contributions, &roles.weights());
//! let decision = ConvergenceDetector::default().evaluate(metrics.quality, metrics.consensus);
//! if decision.converged {
//!     println!("converged at consensus {:.2}", metrics.consensus);
//! }
//! ```

pub mod config;
pub mod convergence;
pub mod metrics;
pub mod roles;
pub mod scoring;
pub mod synthesizer;
pub mod types;

// Re-export main types at crate root
pub use config::ConsensusConfig;
pub use convergence::{
    BreakthroughPlan, ConvergenceDecision, ConvergenceDetector, StagnationDetector,
    BREAKTHROUGH_CLAUSE,
};
pub use metrics::MetricsEngine;
pub use roles::{RoleDefinition, RoleSet, RoleWeights};
pub use scoring::{ContentScorer, HeuristicScorer, RoleAdjustment, Score};
pub use synthesizer::Synthesizer;
pub use types::{
    Contribution, FallbackStrategy, Iteration, IterationMetrics, ProviderId, RoleId, Session,
    SessionMetrics, SessionStatus, Solution, TokenUsage,
};

use thiserror::Error;

/// Errors raised by the deterministic engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
