//! Reflection: deciding whether gathered evidence suffices.
//!
//! A pure stage like the planner. The verdict parser is deliberately
//! biased toward `ContinueSearch`: an ambiguous or malformed model
//! answer must not end a session early, only make it search more (the
//! iteration budget bounds the cost of that bias).

use crate::planner::Plan;
use crate::session::Finding;
use serde::{Deserialize, Serialize};

/// Outcome of a reflection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReflectionVerdict {
    /// Evidence is thin; run another search iteration on the same plan.
    ContinueSearch,
    /// The plan itself is off target; produce a new plan.
    Replan,
    /// Evidence suffices; move on to enhancement and reporting.
    Sufficient,
}

impl std::fmt::Display for ReflectionVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReflectionVerdict::ContinueSearch => "continue-search",
            ReflectionVerdict::Replan => "replan",
            ReflectionVerdict::Sufficient => "sufficient",
        };
        write!(f, "{name}")
    }
}

/// Stateless reflection stage.
#[derive(Debug, Clone, Default)]
pub struct ReflectionEvaluator;

impl ReflectionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn prompt(
        &self,
        goal: &str,
        plan: &Plan,
        findings: &[Finding],
        iteration: usize,
        max_iterations: usize,
    ) -> String {
        let mut prompt = format!(
            "You are reviewing research progress.\n\n\
             Goal: {goal}\n\
             Objective: {}\n\
             Iteration: {iteration} of {max_iterations}\n\n\
             Evidence gathered so far:\n",
            plan.objective
        );
        if findings.is_empty() {
            prompt.push_str("(none)\n");
        } else {
            for finding in findings {
                let claim: String = finding.claim.chars().take(300).collect();
                prompt.push_str(&format!(
                    "- [{:?}] {} ({} sources)\n",
                    finding.confidence,
                    claim,
                    finding.sources.len()
                ));
            }
        }
        prompt.push_str(
            "\nAnswer with exactly one word:\n\
             SUFFICIENT if the evidence answers the goal well enough to report.\n\
             REPLAN if the sub-questions themselves miss the goal and need rewriting.\n\
             CONTINUE if the plan is right but more evidence is needed.",
        );
        prompt
    }

    /// Parse a verdict out of model output.
    ///
    /// Only an unambiguous answer counts: if the text names more than
    /// one verdict, or none, the result is `ContinueSearch`.
    pub fn parse_verdict(&self, text: &str) -> ReflectionVerdict {
        let lower = text.to_lowercase();
        let sufficient = lower.contains("sufficient");
        let replan = lower.contains("replan") || lower.contains("re-plan");

        match (sufficient, replan) {
            (true, false) => ReflectionVerdict::Sufficient,
            (false, true) => ReflectionVerdict::Replan,
            _ => ReflectionVerdict::ContinueSearch,
        }
    }
}
