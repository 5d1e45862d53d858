//! Report generation.
//!
//! The reporter builds the synthesis prompt, wraps model output into a
//! [`ResearchReport`], and can assemble a degraded report directly from
//! the findings when no provider is reachable. Reports are streamed to
//! the consumer as `report_chunk` events; chunking respects UTF-8
//! character boundaries.

use crate::session::{ConfidenceTier, Finding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The final session output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub goal: String,
    /// Markdown body.
    pub body: String,
    pub source_count: usize,
    pub finding_count: usize,
    /// True when the body was assembled from raw findings because
    /// report generation failed.
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

/// Report synthesis stage.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    chunk_size: usize,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self { chunk_size: 800 }
    }
}

impl ReportGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn prompt(&self, goal: &str, findings: &[Finding]) -> String {
        let mut prompt = format!(
            "Write a structured research report in Markdown answering the goal below. \
             Base every statement on the evidence provided; cite sources inline by \
             site name. Open with a short executive summary, then cover the evidence \
             thematically, and end with open questions.\n\n\
             Research goal: {goal}\n\nEvidence:\n"
        );
        for (index, finding) in findings.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{:?}] {}\n",
                index + 1,
                finding.confidence,
                finding.claim
            ));
            for source in &finding.sources {
                let location = source.url.as_deref().unwrap_or(&source.site);
                prompt.push_str(&format!("   source: {} ({location})\n", source.title));
            }
        }
        prompt
    }

    /// Wrap a model completion into a report.
    pub fn from_completion(&self, goal: &str, body: &str, findings: &[Finding]) -> ResearchReport {
        ResearchReport {
            goal: goal.to_string(),
            body: body.to_string(),
            source_count: count_sources(findings),
            finding_count: findings.len(),
            degraded: false,
            generated_at: Utc::now(),
        }
    }

    /// Assemble a report directly from findings, used when generation
    /// fails and the session is configured to flush what it has.
    pub fn degraded(&self, goal: &str, findings: &[Finding]) -> ResearchReport {
        let mut body = format!("# Research findings: {goal}\n\n");
        body.push_str(
            "Report synthesis was unavailable; the findings below are \
             presented as gathered.\n\n## Key findings\n\n",
        );
        for (index, finding) in findings.iter().enumerate() {
            body.push_str(&format!("{}. {}\n", index + 1, finding.claim));
        }

        body.push_str("\n## Sources\n\n");
        let mut seen = std::collections::HashSet::new();
        for finding in findings {
            for source in &finding.sources {
                let key = source
                    .url
                    .clone()
                    .unwrap_or_else(|| format!("{}:{}", source.site, source.title));
                if seen.insert(key) {
                    match &source.url {
                        Some(url) => body.push_str(&format!("- [{}]({url})\n", source.title)),
                        None => body.push_str(&format!("- {} ({})\n", source.title, source.site)),
                    }
                }
            }
        }

        let high = findings
            .iter()
            .filter(|f| f.confidence == ConfidenceTier::High)
            .count();
        body.push_str(&format!(
            "\n## Confidence\n\n{high} of {} findings are high confidence.\n",
            findings.len()
        ));

        ResearchReport {
            goal: goal.to_string(),
            body,
            source_count: count_sources(findings),
            finding_count: findings.len(),
            degraded: true,
            generated_at: Utc::now(),
        }
    }

    /// Split a report body into chunks for streaming, never splitting
    /// inside a UTF-8 character.
    pub fn chunks<'a>(&self, body: &'a str) -> Vec<&'a str> {
        let mut chunks = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            if rest.len() <= self.chunk_size {
                chunks.push(rest);
                break;
            }
            let mut split = self.chunk_size;
            while split > 0 && !rest.is_char_boundary(split) {
                split -= 1;
            }
            if split == 0 {
                // chunk_size is smaller than the first character; widen
                // forward so every chunk consumes at least one character.
                split = self.chunk_size;
                while !rest.is_char_boundary(split) {
                    split += 1;
                }
            }
            let (head, tail) = rest.split_at(split);
            chunks.push(head);
            rest = tail;
        }
        chunks
    }
}

fn count_sources(findings: &[Finding]) -> usize {
    let mut seen = std::collections::HashSet::new();
    for finding in findings {
        for source in &finding.sources {
            seen.insert(
                source
                    .url
                    .clone()
                    .unwrap_or_else(|| format!("{}:{}", source.site, source.title)),
            );
        }
    }
    seen.len()
}
