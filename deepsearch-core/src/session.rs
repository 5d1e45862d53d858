//! Research session state.
//!
//! A [`Session`] is the unit of work: one research goal driven through
//! the phase machine until a terminal phase. Findings are append-only
//! for the lifetime of the session; enhancement produces a refined copy
//! without mutating the accumulated set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase of the research pipeline.
///
/// `Done`, `Cancelled`, and `Failed` are terminal. Transitions are
/// driven exclusively by the session task; consumers observe them
/// through `phase_started` / `phase_completed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Planning,
    Querying,
    Searching,
    Reflecting,
    Enhancing,
    Reporting,
    Done,
    Cancelled,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Done | SessionPhase::Cancelled | SessionPhase::Failed
        )
    }

    /// Coarse completion estimate for progress reporting.
    pub fn progress(&self) -> u8 {
        match self {
            SessionPhase::Planning => 10,
            SessionPhase::Querying => 25,
            SessionPhase::Searching => 45,
            SessionPhase::Reflecting => 60,
            SessionPhase::Enhancing => 75,
            SessionPhase::Reporting => 90,
            SessionPhase::Done | SessionPhase::Cancelled | SessionPhase::Failed => 100,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Planning => "planning",
            SessionPhase::Querying => "querying",
            SessionPhase::Searching => "searching",
            SessionPhase::Reflecting => "reflecting",
            SessionPhase::Enhancing => "enhancing",
            SessionPhase::Reporting => "reporting",
            SessionPhase::Done => "done",
            SessionPhase::Cancelled => "cancelled",
            SessionPhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Confidence in a finding, derived from result relevance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// Map an average relevance score in [0, 1] to a tier.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            ConfidenceTier::High
        } else if score >= 0.4 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// A source backing a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: Option<String>,
    pub site: String,
}

/// One piece of evidence gathered during search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    /// The query that produced this finding.
    pub query: String,
    /// Synthesized claim from the search results.
    pub claim: String,
    pub sources: Vec<SourceRef>,
    pub confidence: ConfidenceTier,
    pub recorded_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(query: impl Into<String>, claim: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            claim: claim.into(),
            sources,
            confidence: ConfidenceTier::Medium,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: ConfidenceTier) -> Self {
        self.confidence = confidence;
        self
    }
}

/// State of one research session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub goal: String,
    pub phase: SessionPhase,
    /// Append-only across the session's lifetime.
    pub findings: Vec<Finding>,
    /// Completed search iterations.
    pub iteration: usize,
    /// Re-plans performed so far.
    pub replans: usize,
    pub max_iterations: usize,
    /// Completion estimate in percent.
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: impl Into<String>, max_iterations: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            phase: SessionPhase::Planning,
            findings: Vec::new(),
            iteration: 0,
            replans: 0,
            max_iterations,
            progress: SessionPhase::Planning.progress(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to a new phase, updating the progress estimate.
    pub fn transition(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.progress = phase.progress();
        self.updated_at = Utc::now();
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
        self.updated_at = Utc::now();
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_terminality() {
        assert!(SessionPhase::Done.is_terminal());
        assert!(SessionPhase::Cancelled.is_terminal());
        assert!(SessionPhase::Failed.is_terminal());
        assert!(!SessionPhase::Searching.is_terminal());
    }

    #[test]
    fn test_phase_wire_names() {
        let json = serde_json::to_string(&SessionPhase::Reflecting).unwrap();
        assert_eq!(json, "\"reflecting\"");
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceTier::from_score(0.9), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(0.5), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.1), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(0.7), ConfidenceTier::High);
    }

    #[test]
    fn test_transition_updates_progress() {
        let mut session = Session::new("quantum networking market", 3);
        assert_eq!(session.phase, SessionPhase::Planning);
        assert!(session.is_active());

        session.transition(SessionPhase::Searching);
        assert_eq!(session.progress, 45);

        session.transition(SessionPhase::Done);
        assert_eq!(session.progress, 100);
        assert!(!session.is_active());
    }

    #[test]
    fn test_findings_accumulate() {
        let mut session = Session::new("goal", 3);
        session.add_finding(Finding::new("q1", "claim one", Vec::new()));
        session.add_finding(Finding::new("q2", "claim two", Vec::new()));
        assert_eq!(session.findings.len(), 2);
        assert_eq!(session.findings[0].claim, "claim one");
    }
}
