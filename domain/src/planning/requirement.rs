//! Agent requirements: the planner's output and the resolver's input.

use crate::util::duration_secs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Resource class used when a requirement names neither a class nor a domain.
pub const DEFAULT_RESOURCE_CLASS: &str = "general";

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_estimated_duration() -> Duration {
    Duration::from_secs(60)
}

/// One unit of planned work.
///
/// Immutable once an [`ExecutionGraph`](super::graph::ExecutionGraph) has been
/// built from it; plan modifications produce a new graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequirement {
    /// Unique name of this requirement within the plan
    pub agent_name: String,
    /// Registry key of the agent implementation (defaults to `agent_name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Semantic tags, e.g. "financial", "legal"
    #[serde(default)]
    pub domains: Vec<String>,
    /// Names of requirements whose output must be available first
    #[serde(default)]
    pub prerequisites: BTreeSet<String>,
    /// Minimum acceptable finding confidence (0–1)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Expected wall-clock duration of one attempt
    #[serde(with = "duration_secs", default = "default_estimated_duration")]
    pub estimated_duration: Duration,
    /// Relevance to the query, used when packing levels
    #[serde(default)]
    pub relevance_score: f64,
    /// Scarce resource this agent contends for (defaults to its first domain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_class: Option<String>,
}

impl AgentRequirement {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            kind: None,
            domains: Vec::new(),
            prerequisites: BTreeSet::new(),
            confidence_threshold: default_confidence_threshold(),
            estimated_duration: default_estimated_duration(),
            relevance_score: 0.0,
            resource_class: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }

    pub fn with_prerequisite(mut self, agent_name: impl Into<String>) -> Self {
        self.prerequisites.insert(agent_name.into());
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = duration;
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = score;
        self
    }

    pub fn with_resource_class(mut self, class: impl Into<String>) -> Self {
        self.resource_class = Some(class.into());
        self
    }

    /// Key used to look the agent implementation up in the registry.
    pub fn registry_key(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.agent_name)
    }

    /// Resource class this agent contends for.
    pub fn resource_class(&self) -> &str {
        self.resource_class
            .as_deref()
            .or(self.domains.first().map(String::as_str))
            .unwrap_or(DEFAULT_RESOURCE_CLASS)
    }

    /// Whether `finding_confidence` meets this requirement's threshold.
    pub fn accepts_confidence(&self, finding_confidence: f64) -> bool {
        finding_confidence >= self.confidence_threshold
    }

    /// Describe why this requirement is malformed, if it is.
    pub(crate) fn validation_issue(&self) -> Option<String> {
        if self.agent_name.trim().is_empty() {
            return Some("agent name cannot be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Some(format!(
                "confidence_threshold {} is outside 0..=1",
                self.confidence_threshold
            ));
        }
        if !self.relevance_score.is_finite() {
            return Some("relevance_score must be finite".to_string());
        }
        if self.estimated_duration.is_zero() {
            return Some("estimated_duration must be positive".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_key_defaults_to_name() {
        let req = AgentRequirement::new("financial_q1");
        assert_eq!(req.registry_key(), "financial_q1");

        let req = req.with_kind("financial");
        assert_eq!(req.registry_key(), "financial");
    }

    #[test]
    fn test_resource_class_fallbacks() {
        assert_eq!(
            AgentRequirement::new("a").resource_class(),
            DEFAULT_RESOURCE_CLASS
        );
        assert_eq!(
            AgentRequirement::new("a").with_domain("web").resource_class(),
            "web"
        );
        assert_eq!(
            AgentRequirement::new("a")
                .with_domain("web")
                .with_resource_class("search_api")
                .resource_class(),
            "search_api"
        );
    }

    #[test]
    fn test_validation_issue() {
        assert!(AgentRequirement::new("ok").validation_issue().is_none());
        assert!(
            AgentRequirement::new("bad")
                .with_confidence_threshold(1.5)
                .validation_issue()
                .is_some()
        );
        assert!(AgentRequirement::new("  ").validation_issue().is_some());
        assert!(
            AgentRequirement::new("slow")
                .with_estimated_duration(Duration::ZERO)
                .validation_issue()
                .is_some()
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let req: AgentRequirement = serde_json::from_str(
            r#"{"agent_name":"legal","prerequisites":["research"],"estimated_duration":30}"#,
        )
        .unwrap();
        assert_eq!(req.agent_name, "legal");
        assert!(req.prerequisites.contains("research"));
        assert_eq!(req.estimated_duration, Duration::from_secs(30));
        assert_eq!(req.confidence_threshold, 0.5);
        assert!(req.kind.is_none());
    }
}
