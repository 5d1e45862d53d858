//! Quality enhancement of gathered findings.
//!
//! Runs after the search loop and before reporting: near-duplicate
//! findings are collapsed and contradicting claim pairs are flagged.
//! The stage is pure local computation over the findings; the session's
//! accumulated findings are read, never mutated, and the refined set is
//! returned alongside a summary.

use crate::session::Finding;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

const EMBED_DIM: usize = 256;

/// What enhancement changed, carried in the `enhancement_applied` event.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancementSummary {
    pub removed_duplicates: usize,
    pub contradictions: Vec<Contradiction>,
    pub retained: usize,
}

/// Two findings whose claims appear to disagree.
#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    pub first: String,
    pub second: String,
}

/// Deduplication and contradiction detection over findings.
#[derive(Debug, Clone)]
pub struct QualityEnhancer {
    /// Cosine similarity at or above which two findings that share a
    /// source are considered duplicates.
    similarity_threshold: f64,
}

impl Default for QualityEnhancer {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

impl QualityEnhancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Produce the refined findings and a change summary.
    ///
    /// Keeps the earliest of each duplicate pair, so finding order and
    /// identity are stable across enhancement.
    pub fn enhance(&self, findings: &[Finding]) -> (Vec<Finding>, EnhancementSummary) {
        let embeddings: Vec<[f64; EMBED_DIM]> =
            findings.iter().map(|f| embed(&f.claim)).collect();

        let mut dropped = HashSet::new();
        for i in 0..findings.len() {
            if dropped.contains(&i) {
                continue;
            }
            for j in (i + 1)..findings.len() {
                if dropped.contains(&j) {
                    continue;
                }
                let similarity = cosine(&embeddings[i], &embeddings[j]);
                if self.is_duplicate(&findings[i], &findings[j], similarity) {
                    debug!(
                        first = %findings[i].id,
                        second = %findings[j].id,
                        similarity,
                        "Collapsing duplicate finding"
                    );
                    dropped.insert(j);
                }
            }
        }

        let retained: Vec<Finding> = findings
            .iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, f)| f.clone())
            .collect();

        let mut contradictions = Vec::new();
        for i in 0..retained.len() {
            for j in (i + 1)..retained.len() {
                if claims_contradict(&retained[i].claim, &retained[j].claim) {
                    contradictions.push(Contradiction {
                        first: retained[i].claim.clone(),
                        second: retained[j].claim.clone(),
                    });
                }
            }
        }

        let summary = EnhancementSummary {
            removed_duplicates: dropped.len(),
            contradictions,
            retained: retained.len(),
        };
        (retained, summary)
    }

    fn is_duplicate(&self, a: &Finding, b: &Finding, similarity: f64) -> bool {
        // Very high similarity is decisive on its own; below that,
        // require a shared source to avoid collapsing independent
        // findings that merely discuss the same topic.
        if similarity >= 0.97 {
            return true;
        }
        similarity >= self.similarity_threshold && shares_source(a, b)
    }
}

fn shares_source(a: &Finding, b: &Finding) -> bool {
    a.sources.iter().any(|sa| {
        b.sources.iter().any(|sb| match (&sa.url, &sb.url) {
            (Some(ua), Some(ub)) => ua == ub,
            _ => !sa.site.is_empty() && sa.site == sb.site,
        })
    })
}

/// Bag-of-words hashing embedding, L2 normalized.
fn embed(text: &str) -> [f64; EMBED_DIM] {
    let mut vector = [0.0f64; EMBED_DIM];
    for token in tokens(text) {
        vector[simple_hash(&token) as usize % EMBED_DIM] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
}

fn simple_hash(token: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in token.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

fn cosine(a: &[f64; EMBED_DIM], b: &[f64; EMBED_DIM]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "cannot", "decline", "declined", "decreasing", "decrease", "falling",
    "fell", "shrinking", "unlikely", "without",
];

/// Negation-asymmetry heuristic: two claims about the same subject
/// where exactly one side negates are flagged for the reader, not
/// resolved automatically.
fn claims_contradict(a: &str, b: &str) -> bool {
    let tokens_a: HashSet<String> = tokens(a).collect();
    let tokens_b: HashSet<String> = tokens(b).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return false;
    }

    let overlap = tokens_a.intersection(&tokens_b).count();
    let min_len = tokens_a.len().min(tokens_b.len());
    if (overlap as f64) / (min_len as f64) < 0.5 {
        return false;
    }

    let negated_a = NEGATIONS.iter().any(|n| tokens_a.contains(*n));
    let negated_b = NEGATIONS.iter().any(|n| tokens_b.contains(*n));
    negated_a != negated_b
}
