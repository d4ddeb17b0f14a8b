//! TOML plan file parsing and the file-backed planner.

use async_trait::async_trait;
use diligence_application::{Planner, PlannerError};
use diligence_domain::{AgentRequirement, AgentTaskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("failed to read plan file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid plan file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Parsed plan file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    /// Research query; the command line may override it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub agents: Vec<PlanAgent>,
    /// Scripts for fallback implementations, keyed by registry key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fallbacks: BTreeMap<String, AgentScript>,
}

/// `[[agents]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAgent {
    pub name: String,
    /// Registry key; defaults to the name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_secs: Option<f64>,
    #[serde(default)]
    pub relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<AgentScript>,
}

/// Behaviour of a scripted demo agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentScript {
    /// Simulated work per attempt
    pub delay_ms: u64,
    /// Error class returned by the first `fail_times` attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_with: Option<ScriptedFailure>,
    pub fail_times: u32,
    /// Provider hint attached to `rate_limited` failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub findings: Vec<ScriptedFinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedFailure {
    Transient,
    RateLimited,
    DataUnavailable,
    Configuration,
    Permanent,
}

impl ScriptedFailure {
    pub fn to_error(self, agent: &str, retry_after: Option<Duration>) -> AgentTaskError {
        match self {
            ScriptedFailure::Transient => {
                AgentTaskError::Transient(format!("{agent}: upstream temporarily unavailable"))
            }
            ScriptedFailure::RateLimited => AgentTaskError::RateLimited {
                message: format!("{agent}: rate limit exceeded"),
                retry_after,
            },
            ScriptedFailure::DataUnavailable => {
                AgentTaskError::DataUnavailable(format!("{agent}: no records found"))
            }
            ScriptedFailure::Configuration => {
                AgentTaskError::Configuration(format!("{agent}: credentials rejected"))
            }
            ScriptedFailure::Permanent => {
                AgentTaskError::Permanent(format!("{agent}: request refused"))
            }
        }
    }
}

/// `[[agents.script.findings]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFinding {
    pub entity: String,
    pub aspect: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
}

impl PlanAgent {
    pub fn to_requirement(&self) -> AgentRequirement {
        let mut requirement =
            AgentRequirement::new(&self.name).with_relevance(self.relevance);
        if let Some(kind) = &self.kind {
            requirement = requirement.with_kind(kind);
        }
        for domain in &self.domains {
            requirement = requirement.with_domain(domain);
        }
        for prerequisite in &self.prerequisites {
            requirement = requirement.with_prerequisite(prerequisite);
        }
        if let Some(threshold) = self.confidence_threshold {
            requirement = requirement.with_confidence_threshold(threshold);
        }
        if let Some(secs) = self.estimated_duration_secs
            && let Ok(duration) = Duration::try_from_secs_f64(secs)
        {
            requirement = requirement.with_estimated_duration(duration);
        }
        if let Some(class) = &self.resource_class {
            requirement = requirement.with_resource_class(class);
        }
        requirement
    }

    /// Registry key this agent resolves to.
    pub fn registry_key(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }
}

impl PlanFile {
    pub fn parse(path: &Path, content: &str) -> Result<Self, PlanError> {
        toml::from_str(content).map_err(|e| PlanError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    pub fn requirements(&self) -> Vec<AgentRequirement> {
        self.agents.iter().map(PlanAgent::to_requirement).collect()
    }
}

/// Planner that answers every query with the agents of a plan file.
pub struct TomlPlanFile {
    path: PathBuf,
    plan: PlanFile,
}

impl TomlPlanFile {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PlanError> {
        let path = path.into();
        let plan = PlanFile::load(&path)?;
        Ok(Self { path, plan })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plan(&self) -> &PlanFile {
        &self.plan
    }
}

#[async_trait]
impl Planner for TomlPlanFile {
    async fn plan(&self, _query: &str) -> Result<Vec<AgentRequirement>, PlannerError> {
        if self.plan.agents.is_empty() {
            return Err(PlannerError::InvalidPlan(format!(
                "{} declares no agents",
                self.path.display()
            )));
        }
        Ok(self.plan.requirements())
    }
}
