//! Finding entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(Uuid);

impl FindingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FindingId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a finding came from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceCitation {
    /// URL, document reference or registry identifier
    pub citation: String,
    /// Reliability of the source itself (0.0 - 1.0), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
}

impl SourceCitation {
    pub fn new(citation: impl Into<String>) -> Self {
        Self {
            citation: citation.into(),
            reliability: None,
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = Some(reliability.clamp(0.0, 1.0));
        self
    }
}

/// One atomic claim by one agent about one entity. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    /// Name of the agent requirement that produced it
    pub agent_id: String,
    /// Subject entity, e.g. "Acme Corp"
    pub entity: String,
    /// Aspect bucket assigned by the producing agent, e.g. "registration_date"
    pub aspect: String,
    pub content: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub source: SourceCitation,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn new(
        agent_id: impl Into<String>,
        entity: impl Into<String>,
        aspect: impl Into<String>,
        content: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: FindingId::new(),
            agent_id: agent_id.into(),
            entity: entity.into(),
            aspect: aspect.into(),
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: SourceCitation::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: FindingId) -> Self {
        self.id = id;
        self
    }

    pub fn with_source(mut self, source: SourceCitation) -> Self {
        self.source = source;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Re-attribute to `agent_id` (used when a fallback implementation ran).
    pub fn attributed_to(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let finding = Finding::new("a", "Acme", "revenue", "$5M", 1.7);
        assert_eq!(finding.confidence, 1.0);
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(FindingId::new(), FindingId::new());
    }

    #[test]
    fn test_serde_shape() {
        let finding = Finding::new("registry", "Acme", "registration_date", "2018-03-15", 0.9)
            .with_source(SourceCitation::new("companies-house").with_reliability(0.95));
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["source"]["citation"], "companies-house");
        assert!(json["id"].is_string());

        let back: Finding = serde_json::from_value(json).unwrap();
        assert_eq!(back, finding);
    }
}
