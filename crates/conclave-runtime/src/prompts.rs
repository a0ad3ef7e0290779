//! Prompts for consensus roles.
//!
//! A role call is built from three parts:
//! 1. Base prompt (shared across all roles)
//! 2. Role template from the [`RoleDefinition`]
//! 3. Dynamic content (problem, round number, the previous round's
//!    contributions, earlier contributions in this round)
//!
//! The rule-based and role-recovery texts used when no provider answers
//! also live here.

use conclave_core::{Contribution, RoleDefinition, RoleId};

/// Base system prompt shared across all roles.
pub const BASE_SYSTEM_PROMPT: &str = r#"
You are one member of a small panel working toward a shared solution.

Each member has a distinct role. You will see what the members before you
said in this round. Build on it, disagree with it where it is wrong, and
make your own contribution clearly identifiable.

## Panel Rules
1. Stay within your role
2. Be specific: name components, numbers, risks
3. Reference earlier contributions when you agree or disagree
4. Prefer one well-argued proposal over a list of vague ideas
5. Keep the answer under 400 words

## Output
Plain prose or short markdown. No preamble about being an AI.
"#;

/// Characters of the problem kept in a simplified prompt.
const SIMPLIFIED_PROBLEM_CHARS: usize = 500;

/// Full system prompt for a role.
pub fn system_prompt(role: &RoleDefinition) -> String {
    let mut prompt = String::with_capacity(BASE_SYSTEM_PROMPT.len() + role.prompt_template.len() + 64);
    prompt.push_str(BASE_SYSTEM_PROMPT.trim());
    prompt.push_str("\n\n## Your Role: ");
    prompt.push_str(&role.name);
    prompt.push('\n');
    prompt.push_str(&role.prompt_template);
    if !role.expertise.is_empty() {
        prompt.push_str("\n\nExpertise: ");
        prompt.push_str(&role.expertise.join(", "));
    }
    prompt
}

/// Where a role step sits in the session.
#[derive(Debug, Clone, Copy)]
pub struct RoleTurn<'a> {
    /// Problem as this role sees it, including any breakthrough clause
    pub problem: &'a str,

    /// 1-based iteration number
    pub round: u32,

    /// Contributions sealed in the previous iteration
    pub previous: &'a [Contribution],

    /// Contributions already made in this iteration, in order
    pub prior: &'a [Contribution],
}

impl<'a> RoleTurn<'a> {
    /// Opening turn of a session: round 1, nothing said yet.
    pub fn first(problem: &'a str) -> Self {
        Self {
            problem,
            round: 1,
            previous: &[],
            prior: &[],
        }
    }
}

/// User prompt for a role.
///
/// Round number, then the previous round's contributions, then what
/// earlier roles said in this round.
pub fn build_role_prompt(turn: &RoleTurn<'_>) -> String {
    let mut prompt = format!("## Problem\n{}\n\n## Round {}\n", turn.problem.trim(), turn.round);

    if !turn.previous.is_empty() {
        prompt.push_str(&format!(
            "\n## Previous Round\nRefine or challenge what the panel said in round {}.\n",
            turn.round.saturating_sub(1)
        ));
        push_contributions(&mut prompt, turn.previous);
    }

    if turn.prior.is_empty() {
        prompt.push_str("\nYou are the first to speak this round.\n");
    } else {
        prompt.push_str("\n## Contributions So Far\n");
        push_contributions(&mut prompt, turn.prior);
    }

    prompt.push_str("\n## Your Contribution\n");
    prompt
}

fn push_contributions(prompt: &mut String, contributions: &[Contribution]) {
    for contribution in contributions {
        prompt.push_str(&format!(
            "\n### {}\n{}\n",
            contribution.role,
            contribution.content.trim()
        ));
    }
}

/// Shortened prompt for the simplified-prompt fallback.
pub fn simplified_prompt(role: RoleId, problem: &str) -> String {
    let problem = problem.trim();
    let short: String = problem.chars().take(SIMPLIFIED_PROBLEM_CHARS).collect();
    let ellipsis = if short.len() < problem.len() { "..." } else { "" };
    format!(
        "As the {}, give a brief answer to this problem.\n\n{}{}",
        role_name(role),
        short,
        ellipsis
    )
}

/// Templated answer used when no provider or cache could help.
pub fn rule_based_response(role: RoleId, problem: &str) -> String {
    let topic = summarize(problem);
    match role {
        RoleId::Architect => format!(
            "Proposed structure for \"{topic}\": split the problem into independent components \
             with narrow interfaces, keep state in one place, and make every external dependency \
             replaceable. Start with the simplest design that handles the core case, then add \
             capacity where measurements show it is needed."
        ),
        RoleId::Catalyst => format!(
            "Alternative angle on \"{topic}\": question the main assumption behind the current \
             direction. Consider solving a smaller version first, removing a component instead of \
             adding one, or borrowing an approach from a neighbouring domain."
        ),
        RoleId::Synthesizer => format!(
            "Combined view on \"{topic}\": keep the structure proposed so far, adopt the \
             alternatives that reduce risk without adding complexity, and record open \
             disagreements as explicit decisions to revisit."
        ),
        RoleId::Evaluator => format!(
            "Assessment of \"{topic}\": check feasibility, cost, operational risk and \
             completeness. The proposal should state measurable success criteria and a rollback \
             plan before it is accepted."
        ),
    }
}

/// Placeholder answer when a role's contribution step failed outright.
pub fn role_recovery_response(role: RoleId, problem: &str) -> String {
    format!(
        "The {} could not produce a full contribution this round for \"{}\". \
         Earlier contributions stand; this role will revisit the problem next round.",
        role_name(role),
        summarize(problem)
    )
}

fn role_name(role: RoleId) -> &'static str {
    match role {
        RoleId::Architect => "Architect",
        RoleId::Catalyst => "Catalyst",
        RoleId::Synthesizer => "Synthesizer",
        RoleId::Evaluator => "Evaluator",
    }
}

/// First line of the problem, capped at 80 characters.
fn summarize(problem: &str) -> String {
    let first_line = problem.trim().lines().next().unwrap_or_default();
    let mut summary: String = first_line.chars().take(80).collect();
    if summary.len() < first_line.len() {
        summary.push_str("...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::ProviderId;

    #[test]
    fn test_system_prompt_includes_role() {
        let role = RoleDefinition::default_for(RoleId::Catalyst);
        let prompt = system_prompt(&role);
        assert!(prompt.starts_with("You are one member"));
        assert!(prompt.contains("Your Role: Creative Catalyst"));
        assert!(prompt.contains(&role.prompt_template));
        assert!(prompt.contains("lateral thinking"));
    }

    fn said(role: RoleId, content: &str) -> Contribution {
        Contribution::new(role, content, 7.0, 0.8, Some(ProviderId::Mock), "m")
    }

    #[test]
    fn test_role_prompt_embeds_prior_in_order() {
        let prior = vec![
            said(RoleId::Architect, "Use a queue."),
            said(RoleId::Catalyst, "Or a log."),
        ];
        let prompt = build_role_prompt(&RoleTurn {
            prior: &prior,
            ..RoleTurn::first("Design ingestion")
        });

        let architect = prompt.find("### architect").unwrap();
        let catalyst = prompt.find("### catalyst").unwrap();
        assert!(architect < catalyst);
        assert!(prompt.contains("Use a queue."));
        assert!(prompt.contains("Design ingestion"));
    }

    #[test]
    fn test_first_role_prompt() {
        let prompt = build_role_prompt(&RoleTurn::first("Design ingestion"));
        assert!(prompt.contains("## Round 1"));
        assert!(prompt.contains("first to speak"));
        assert!(!prompt.contains("Contributions So Far"));
        assert!(!prompt.contains("Previous Round"));
    }

    #[test]
    fn test_later_round_carries_previous_round() {
        let previous = vec![
            said(RoleId::Architect, "Use a queue."),
            said(RoleId::Evaluator, "Queue depth is unbounded."),
        ];
        let turn = RoleTurn {
            round: 2,
            previous: &previous,
            ..RoleTurn::first("Design ingestion")
        };
        let prompt = build_role_prompt(&turn);

        assert!(prompt.contains("## Round 2"));
        assert!(prompt.contains("what the panel said in round 1"));
        assert!(prompt.contains("Queue depth is unbounded."));
        assert!(prompt.contains("first to speak"));

        // Same inputs in another round ask a different question
        let round_three = build_role_prompt(&RoleTurn { round: 3, ..turn });
        assert_ne!(prompt, round_three);
        assert_ne!(prompt, build_role_prompt(&RoleTurn::first("Design ingestion")));
    }

    #[test]
    fn test_simplified_prompt_truncates() {
        let problem = "x".repeat(2000);
        let prompt = simplified_prompt(RoleId::Evaluator, &problem);
        assert!(prompt.contains("Evaluator"));
        assert!(prompt.ends_with("..."));
        assert!(prompt.len() < 600);
    }

    #[test]
    fn test_rule_based_response_per_role() {
        for role in RoleId::ALL {
            let text = rule_based_response(role, "Reduce checkout latency\nmore detail");
            assert!(text.contains("Reduce checkout latency"));
            assert!(!text.contains("more detail"));
            assert!(text.len() >= 50);
        }
    }

    #[test]
    fn test_role_recovery_response() {
        let text = role_recovery_response(RoleId::Synthesizer, "Plan the migration");
        assert!(text.contains("Synthesizer"));
        assert!(text.contains("Plan the migration"));
    }
}
