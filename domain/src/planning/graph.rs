//! Execution graph: the validated dependency DAG and its levels.

use super::requirement::AgentRequirement;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// How agents are packed into and ordered within execution levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStrategy {
    /// Maximise level width up to `max_parallel_agents`, most relevant first
    #[default]
    Speed,
    /// Spread agents sharing a resource class across the level
    Resource,
    /// Strictest confidence thresholds first
    Reliability,
}

impl OptimizationStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            OptimizationStrategy::Speed => "speed",
            OptimizationStrategy::Resource => "resource",
            OptimizationStrategy::Reliability => "reliability",
        }
    }
}

impl std::fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OptimizationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "speed" => Ok(OptimizationStrategy::Speed),
            "resource" => Ok(OptimizationStrategy::Resource),
            "reliability" => Ok(OptimizationStrategy::Reliability),
            other => Err(format!(
                "unknown optimization strategy '{}' (expected speed, resource or reliability)",
                other
            )),
        }
    }
}

/// A batch of agents whose prerequisites all ran in earlier levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLevel {
    pub index: usize,
    /// Agent names in dispatch order
    pub agents: Vec<String>,
}

impl ExecutionLevel {
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.agents.iter().any(|a| a == agent)
    }
}

/// Acyclic graph over agent requirements, partitioned into levels.
///
/// Only [`DependencyResolver`](super::resolver::DependencyResolver) builds
/// one, so every instance is known to be acyclic and to satisfy the level
/// ordering invariant checked by [`respects_dependencies`](Self::respects_dependencies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    requirements: BTreeMap<String, AgentRequirement>,
    levels: Vec<ExecutionLevel>,
    strategy: OptimizationStrategy,
}

impl ExecutionGraph {
    pub(crate) fn new(
        requirements: BTreeMap<String, AgentRequirement>,
        levels: Vec<ExecutionLevel>,
        strategy: OptimizationStrategy,
    ) -> Self {
        Self {
            requirements,
            levels,
            strategy,
        }
    }

    pub fn strategy(&self) -> OptimizationStrategy {
        self.strategy
    }

    pub fn levels(&self) -> &[ExecutionLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&ExecutionLevel> {
        self.levels.get(index)
    }

    pub fn requirement(&self, agent: &str) -> Option<&AgentRequirement> {
        self.requirements.get(agent)
    }

    pub fn requirements(&self) -> impl Iterator<Item = &AgentRequirement> {
        self.requirements.values()
    }

    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.requirements.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Index of the level containing `agent`.
    pub fn level_of(&self, agent: &str) -> Option<usize> {
        self.levels.iter().position(|l| l.contains(agent))
    }

    /// Direct dependents of `agent` (agents listing it as a prerequisite).
    pub fn dependents(&self, agent: &str) -> Vec<&str> {
        self.requirements
            .values()
            .filter(|r| r.prerequisites.contains(agent))
            .map(|r| r.agent_name.as_str())
            .collect()
    }

    /// All transitive prerequisites of `agent`.
    pub fn ancestors(&self, agent: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .requirements
            .get(agent)
            .map(|r| r.prerequisites.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(name) = stack.pop() {
            if seen.insert(name.to_string())
                && let Some(req) = self.requirements.get(name)
            {
                stack.extend(req.prerequisites.iter().map(String::as_str));
            }
        }
        seen
    }

    /// Check the level ordering invariant: every prerequisite of an agent in
    /// level `k` sits in some level `j < k`, and each agent appears once.
    pub fn respects_dependencies(&self) -> bool {
        let mut placed = BTreeMap::new();
        for level in &self.levels {
            for agent in &level.agents {
                if placed.insert(agent.as_str(), level.index).is_some() {
                    return false;
                }
            }
        }
        if placed.len() != self.requirements.len() {
            return false;
        }

        self.requirements.values().all(|req| {
            let Some(&own) = placed.get(req.agent_name.as_str()) else {
                return false;
            };
            req.prerequisites
                .iter()
                .all(|p| placed.get(p.as_str()).is_some_and(|&j| j < own))
        })
    }
}
