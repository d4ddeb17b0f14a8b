//! Conflict entities

use crate::finding::entities::FindingId;
use serde::{Deserialize, Serialize};

/// Kind of disagreement between two findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Same kind of value, different beyond tolerance
    Contradictory,
    /// Dates differing beyond the tolerance window
    InconsistentDates,
    /// Values of different kinds (e.g. a number against free text)
    DifferentValues,
    /// Differing values from sources of markedly different reliability
    SourceReliability,
}

impl ConflictType {
    pub fn as_str(&self) -> &str {
        match self {
            ConflictType::Contradictory => "contradictory",
            ConflictType::InconsistentDates => "inconsistent_dates",
            ConflictType::DifferentValues => "different_values",
            ConflictType::SourceReliability => "source_reliability",
        }
    }

    /// Multiplier applied to the weaker confidence to get severity.
    pub fn severity_weight(&self) -> f64 {
        match self {
            ConflictType::Contradictory => 1.0,
            ConflictType::InconsistentDates => 0.8,
            ConflictType::SourceReliability => 0.7,
            ConflictType::DifferentValues => 0.6,
        }
    }

    /// Fixed strategy label; downstream reporting applies it.
    pub fn default_strategy(&self) -> ResolutionStrategy {
        match self {
            ConflictType::Contradictory => ResolutionStrategy::ConfidenceBased,
            ConflictType::InconsistentDates => ResolutionStrategy::Temporal,
            ConflictType::SourceReliability => ResolutionStrategy::SourceReliability,
            ConflictType::DifferentValues => ResolutionStrategy::PresentBoth,
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How reporting should present a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ConfidenceBased,
    SourceReliability,
    Temporal,
    PresentBoth,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            ResolutionStrategy::ConfidenceBased => "confidence_based",
            ResolutionStrategy::SourceReliability => "source_reliability",
            ResolutionStrategy::Temporal => "temporal",
            ResolutionStrategy::PresentBoth => "present_both",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether conflicts get a type-specific strategy label or all go to review.
///
/// Deliberately has no `Default`: callers must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictHandling {
    /// Label each conflict with its type's strategy
    AutoLabel,
    /// Label every conflict `PresentBoth`
    ReviewAll,
}

impl ConflictHandling {
    pub fn as_str(&self) -> &str {
        match self {
            ConflictHandling::AutoLabel => "auto_label",
            ConflictHandling::ReviewAll => "review_all",
        }
    }
}

impl std::str::FromStr for ConflictHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "auto_label" | "auto" => Ok(ConflictHandling::AutoLabel),
            "review_all" | "review" => Ok(ConflictHandling::ReviewAll),
            other => Err(format!(
                "unknown conflict handling '{other}' (expected auto_label or review_all)"
            )),
        }
    }
}

impl std::fmt::Display for ConflictHandling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifier of a conflict, derived from its ordered finding pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(String);

impl ConflictId {
    pub fn for_pair(first: &FindingId, second: &FindingId) -> Self {
        let (a, b) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        Self(format!("{a}~{b}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConflictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A disagreement between exactly two findings about the same entity/aspect.
///
/// Only `resolved` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    /// The two findings, ordered by id
    pub findings: [FindingId; 2],
    /// Normalized entity
    pub entity: String,
    /// Normalized aspect
    pub aspect: String,
    pub conflict_type: ConflictType,
    /// 0.0 - 1.0
    pub severity: f64,
    pub resolution_strategy: ResolutionStrategy,
    pub resolved: bool,
}

impl Conflict {
    pub fn involves(&self, finding: &FindingId) -> bool {
        self.findings.contains(finding)
    }
}
