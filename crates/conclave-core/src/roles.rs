//! Role definitions and iteration-scoped weights.

use serde::{Deserialize, Serialize};

use crate::types::RoleId;
use crate::CoreError;

/// Default template for the Architect role.
pub const ARCHITECT_TEMPLATE: &str = "You are the Architect. Design the overall structure of a \
solution: components, interfaces, data flows and the trade-offs between them. Prefer \
simplicity over cleverness and state assumptions explicitly.";

/// Default template for the Catalyst role.
pub const CATALYST_TEMPLATE: &str = "You are the Catalyst. Challenge the emerging direction, \
propose alternatives nobody has considered yet and question assumptions. Be concrete about \
what each alternative would change.";

/// Default template for the Synthesizer role.
pub const SYNTHESIZER_TEMPLATE: &str = "You are the Synthesizer. Combine the strongest elements \
of the other contributions into one coherent, unified proposal. Resolve conflicts explicitly \
and keep important nuances.";

/// Default template for the Evaluator role.
pub const EVALUATOR_TEMPLATE: &str = "You are the Evaluator. Assess the proposals against clear \
criteria: feasibility, risk, cost and completeness. Name strengths and weaknesses and say \
what must change before the solution is acceptable.";

/// Static configuration of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: RoleId,

    /// Human-readable name
    pub name: String,

    /// Weight in the quality mean, strictly positive
    pub weight: f64,

    /// Instructions sent as the role's system prompt
    pub prompt_template: String,

    /// Expertise tags, in priority order
    #[serde(default)]
    pub expertise: Vec<String>,
}

impl RoleDefinition {
    /// Built-in definition for a role.
    pub fn default_for(id: RoleId) -> Self {
        let (name, weight, template, expertise): (&str, f64, &str, &[&str]) = match id {
            RoleId::Architect => (
                "Systems Architect",
                1.2,
                ARCHITECT_TEMPLATE,
                &["system design", "scalability", "interfaces"],
            ),
            RoleId::Catalyst => (
                "Creative Catalyst",
                1.0,
                CATALYST_TEMPLATE,
                &["lateral thinking", "alternatives", "assumption testing"],
            ),
            RoleId::Synthesizer => (
                "Integrative Synthesizer",
                1.3,
                SYNTHESIZER_TEMPLATE,
                &["integration", "conflict resolution", "consensus building"],
            ),
            RoleId::Evaluator => (
                "Critical Evaluator",
                1.1,
                EVALUATOR_TEMPLATE,
                &["risk assessment", "criteria", "feasibility"],
            ),
        };

        Self {
            id,
            name: name.to_string(),
            weight,
            prompt_template: template.to_string(),
            expertise: expertise.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Ordered set of roles taking part in a session.
///
/// Order is evaluation order: later roles see earlier roles' output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet {
    roles: Vec<RoleDefinition>,
}

impl RoleSet {
    /// Build a role set, rejecting duplicates and non-positive weights.
    pub fn new(roles: Vec<RoleDefinition>) -> Result<Self, CoreError> {
        let set = Self { roles };
        set.validate()?;
        Ok(set)
    }

    /// Check the set is non-empty, duplicate-free and positively weighted.
    pub fn validate(&self) -> Result<(), CoreError> {
        let roles = &self.roles;
        if roles.is_empty() {
            return Err(CoreError::InvalidConfig("at least one role is required".into()));
        }
        for (i, role) in roles.iter().enumerate() {
            if !(role.weight > 0.0) || !role.weight.is_finite() {
                return Err(CoreError::InvalidConfig(format!(
                    "role {} has non-positive weight {}",
                    role.id, role.weight
                )));
            }
            if roles[..i].iter().any(|r| r.id == role.id) {
                return Err(CoreError::InvalidConfig(format!("duplicate role {}", role.id)));
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.roles.iter()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn get(&self, id: RoleId) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.id == id)
    }

    /// Base weights, one per role, in evaluation order.
    pub fn weights(&self) -> RoleWeights {
        RoleWeights {
            entries: self.roles.iter().map(|r| (r.id, r.weight)).collect(),
        }
    }
}

impl Default for RoleSet {
    fn default() -> Self {
        Self {
            roles: RoleId::ALL.iter().map(|id| RoleDefinition::default_for(*id)).collect(),
        }
    }
}

/// Weights in effect for a single iteration.
///
/// Derived fresh from the [`RoleSet`] at the start of every iteration, so a
/// boost applied here never leaks into the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleWeights {
    entries: Vec<(RoleId, f64)>,
}

impl RoleWeights {
    /// Weight for a role; roles outside the set weigh 1.0.
    pub fn get(&self, role: RoleId) -> f64 {
        self.entries
            .iter()
            .find(|(id, _)| *id == role)
            .map(|(_, w)| *w)
            .unwrap_or(1.0)
    }

    /// Multiply one role's weight.
    pub fn boost(mut self, role: RoleId, factor: f64) -> Self {
        for (id, weight) in &mut self.entries {
            if *id == role {
                *weight *= factor;
            }
        }
        self
    }

    pub fn entries(&self) -> &[(RoleId, f64)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(RoleId, f64)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let weights = RoleSet::default().weights();
        assert_eq!(weights.get(RoleId::Architect), 1.2);
        assert_eq!(weights.get(RoleId::Catalyst), 1.0);
        assert_eq!(weights.get(RoleId::Synthesizer), 1.3);
        assert_eq!(weights.get(RoleId::Evaluator), 1.1);
    }

    #[test]
    fn test_boost_does_not_touch_role_set() {
        let roles = RoleSet::default();
        let boosted = roles.weights().boost(RoleId::Catalyst, 1.5);
        assert_eq!(boosted.get(RoleId::Catalyst), 1.5);
        assert_eq!(roles.weights().get(RoleId::Catalyst), 1.0);
    }

    #[test]
    fn test_rejects_non_positive_weight() {
        let mut role = RoleDefinition::default_for(RoleId::Architect);
        role.weight = 0.0;
        assert!(RoleSet::new(vec![role]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_roles() {
        let roles = vec![
            RoleDefinition::default_for(RoleId::Evaluator),
            RoleDefinition::default_for(RoleId::Evaluator),
        ];
        assert!(RoleSet::new(roles).is_err());
    }

    #[test]
    fn test_default_order() {
        let ids: Vec<RoleId> = RoleSet::default().iter().map(|r| r.id).collect();
        assert_eq!(ids, RoleId::ALL.to_vec());
    }
}
