use super::error::AppError;
use super::operation::StructuredOperation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete, deterministic rating of how completely a query matched.
///
/// | Bucket | Score |
/// |--------|-------|
/// | High   | 0.9   |
/// | Medium | 0.7   |
/// | Low    | 0.4   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBucket {
    Low,
    Medium,
    High,
}

impl ConfidenceBucket {
    pub fn score(&self) -> f32 {
        match self {
            ConfidenceBucket::High => 0.9,
            ConfidenceBucket::Medium => 0.7,
            ConfidenceBucket::Low => 0.4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceBucket::High => "High",
            ConfidenceBucket::Medium => "Medium",
            ConfidenceBucket::Low => "Low",
        }
    }
}

impl fmt::Display for ConfidenceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Produced by the rule-based template registry.
    Rule,
    /// Produced by the fallback semantic parser.
    Model,
    /// Harmless variant added by the resolver.
    Synthesized,
    /// Universal preview fallback.
    Fallback,
}

/// One interpretation of a query before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub operation: StructuredOperation,
    pub confidence: ConfidenceBucket,
    /// Registry position of the producing template; lower wins ties.
    pub priority: usize,
    pub source: CandidateSource,
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub operation: StructuredOperation,
    pub label: String,
    pub rank: usize,
    pub confidence: ConfidenceBucket,
    pub score: f32,
    pub source: CandidateSource,
}

/// Outcome of parsing one query; consumed by the collaborator and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub query: String,
    pub dataset_fingerprint: String,
    pub primary: Suggestion,
    pub alternatives: Vec<Suggestion>,
    /// The error that degraded this parse, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<AppError>,
}

impl ParseResult {
    pub fn confidence(&self) -> ConfidenceBucket {
        self.primary.confidence
    }

    /// Exactly one suggestion is High
    pub fn is_confident(&self) -> bool {
        self.primary.confidence == ConfidenceBucket::High
            && self
                .alternatives
                .iter()
                .all(|a| a.confidence != ConfidenceBucket::High)
    }

    /// Primary followed by alternatives, in rank order.
    pub fn suggestions(&self) -> impl Iterator<Item = &Suggestion> {
        std::iter::once(&self.primary).chain(self.alternatives.iter())
    }

    /// Look up a suggestion by rank (0 is the primary).
    pub fn choice(&self, rank: usize) -> Option<&Suggestion> {
        self.suggestions().find(|s| s.rank == rank)
    }
}
