//! Query planning.
//!
//! The planner is a pure stage: it builds prompts and parses model
//! output into a [`Plan`], never calling a provider itself. Model
//! output is treated as hostile; JSON is pulled out of fenced blocks or
//! surrounding prose, and a heuristic default plan covers the case
//! where no usable structure can be recovered.

use crate::session::Finding;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;
use uuid::Uuid;

/// A research plan: the restated objective plus the sub-questions to
/// investigate, one iteration's worth at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub objective: String,
    pub sub_questions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(objective: impl Into<String>, sub_questions: Vec<String>) -> Self {
        Self {
            objective: objective.into(),
            sub_questions,
            created_at: Utc::now(),
        }
    }
}

/// One search query scheduled for an iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    /// 1-based iteration the query belongs to.
    pub iteration: usize,
}

#[derive(Deserialize)]
struct PlanPayload {
    #[serde(default)]
    objective: String,
    #[serde(default)]
    sub_questions: Vec<String>,
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fenced block regex is valid")
    })
}

/// Extract the first balanced JSON object or array from free text.
///
/// Tries a fenced code block first, then scans for the first `{` or `[`
/// and matches brackets with string awareness.
pub(crate) fn extract_json(text: &str) -> Option<String> {
    if let Some(captures) = fenced_json_re().captures(text) {
        let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Some(balanced) = extract_balanced(inner) {
            return Some(balanced);
        }
    }
    extract_balanced(text)
}

fn extract_balanced(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Stateless planning stage.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Build the planning prompt. On re-plan, findings gathered so far
    /// are summarized so the model can steer away from covered ground.
    pub fn plan_prompt(&self, goal: &str, findings: &[Finding]) -> String {
        let mut prompt = format!(
            "You are a research planner. Break the research goal below into \
             focused, searchable sub-questions.\n\n\
             Research goal: {goal}\n\n"
        );
        if !findings.is_empty() {
            prompt.push_str("Evidence already gathered (avoid re-covering it):\n");
            for finding in findings.iter().take(10) {
                let claim: String = finding.claim.chars().take(200).collect();
                prompt.push_str(&format!("- [{}] {}\n", finding.query, claim));
            }
            prompt.push('\n');
        }
        prompt.push_str(
            "Respond with a JSON object:\n\
             {\"objective\": \"restated goal\", \"sub_questions\": [\"...\", \"...\"]}\n\
             Provide 5 to 10 sub-questions, each usable verbatim as a web search query.",
        );
        prompt
    }

    /// Parse model output into a [`Plan`].
    ///
    /// Accepts a `{objective, sub_questions}` object or a bare array of
    /// questions. Falls back to a default plan when nothing usable can
    /// be extracted, so planning never hard-fails on sloppy output.
    pub fn parse_plan(&self, goal: &str, text: &str) -> Plan {
        if let Some(json) = extract_json(text) {
            if let Ok(payload) = serde_json::from_str::<PlanPayload>(&json) {
                if !payload.sub_questions.is_empty() {
                    let objective = if payload.objective.is_empty() {
                        goal.to_string()
                    } else {
                        payload.objective
                    };
                    return Plan::new(objective, payload.sub_questions);
                }
            }
            if let Ok(questions) = serde_json::from_str::<Vec<String>>(&json) {
                if !questions.is_empty() {
                    return Plan::new(goal, questions);
                }
            }
        }
        warn!(goal, "Planner output unparseable, using default sub-questions");
        Plan::new(goal, Self::default_sub_questions(goal))
    }

    /// Heuristic plan covering the standard research angles.
    pub fn default_sub_questions(goal: &str) -> Vec<String> {
        vec![
            format!("{goal} definition and how it works"),
            format!("{goal} key players and market landscape"),
            format!("{goal} recent developments 2025"),
            format!("{goal} statistics and market data"),
            format!("{goal} risks challenges and outlook"),
        ]
    }

    /// Queries for a 1-based iteration, at most `cap` of them.
    ///
    /// Iterations consume consecutive slices of the sub-question list;
    /// once the list is exhausted, earlier questions are reused with a
    /// broadening suffix so later iterations still make progress.
    pub fn queries_for_iteration(&self, plan: &Plan, iteration: usize, cap: usize) -> Vec<Query> {
        let total = plan.sub_questions.len();
        if total == 0 || cap == 0 {
            return Vec::new();
        }
        let start = (iteration.saturating_sub(1)) * cap;
        (start..start + cap)
            .filter_map(|i| {
                if i < total {
                    Some(plan.sub_questions[i].clone())
                } else if start >= total {
                    // Wrapped past the plan: broaden a reused question.
                    let reused = &plan.sub_questions[i % total];
                    Some(format!("{reused} latest analysis"))
                } else {
                    None
                }
            })
            .map(|text| Query {
                id: Uuid::new_v4(),
                text,
                iteration,
            })
            .collect()
    }
}
