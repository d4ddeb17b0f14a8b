//! Dependency resolver
//!
//! Turns a flat list of [`AgentRequirement`]s into an [`ExecutionGraph`]:
//!
//! 1. Validate names, thresholds and prerequisite references
//! 2. Reject cycles (depth-first search with a recursion stack)
//! 3. Partition into levels with Kahn's algorithm
//! 4. Order each level according to the [`OptimizationStrategy`]
//!
//! Strategy post-processing only reorders agents *within* a level, except for
//! `Speed`, which caps level width and lets the overflow wait for the next
//! round of Kahn's algorithm. Neither can move an agent ahead of its
//! prerequisites.

use super::error::PlanningError;
use super::graph::{ExecutionGraph, ExecutionLevel, OptimizationStrategy};
use super::requirement::AgentRequirement;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Builds execution graphs from agent requirements.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    max_parallel_agents: usize,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(5)
    }
}

impl DependencyResolver {
    /// `max_parallel_agents` caps level width under the `Speed` strategy.
    pub fn new(max_parallel_agents: usize) -> Self {
        Self {
            max_parallel_agents: max_parallel_agents.max(1),
        }
    }

    pub fn max_parallel_agents(&self) -> usize {
        self.max_parallel_agents
    }

    /// Validate `requirements` and partition them into execution levels.
    pub fn resolve(
        &self,
        requirements: Vec<AgentRequirement>,
        strategy: OptimizationStrategy,
    ) -> Result<ExecutionGraph, PlanningError> {
        if requirements.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }

        let mut by_name = BTreeMap::new();
        for req in requirements {
            if let Some(reason) = req.validation_issue() {
                return Err(PlanningError::InvalidRequirement {
                    agent: req.agent_name,
                    reason,
                });
            }
            if by_name.contains_key(&req.agent_name) {
                return Err(PlanningError::DuplicateAgent(req.agent_name));
            }
            by_name.insert(req.agent_name.clone(), req);
        }

        for req in by_name.values() {
            if let Some(missing) = req
                .prerequisites
                .iter()
                .find(|p| !by_name.contains_key(p.as_str()))
            {
                return Err(PlanningError::UnknownDependency {
                    agent: req.agent_name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        if let Some(cycle) = detect_cycle(&by_name) {
            return Err(PlanningError::CyclicDependency { cycle });
        }

        let levels = self.partition(&by_name, strategy)?;
        Ok(ExecutionGraph::new(by_name, levels, strategy))
    }

    /// Kahn's algorithm, one level per round.
    fn partition(
        &self,
        requirements: &BTreeMap<String, AgentRequirement>,
        strategy: OptimizationStrategy,
    ) -> Result<Vec<ExecutionLevel>, PlanningError> {
        let mut in_degree: HashMap<&str, usize> = requirements
            .values()
            .map(|r| (r.agent_name.as_str(), r.prerequisites.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for req in requirements.values() {
            for prerequisite in &req.prerequisites {
                dependents
                    .entry(prerequisite.as_str())
                    .or_default()
                    .push(req.agent_name.as_str());
            }
        }

        let mut ready: Vec<&AgentRequirement> = requirements
            .values()
            .filter(|r| r.prerequisites.is_empty())
            .collect();
        let mut levels = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            let batch = if strategy == OptimizationStrategy::Speed
                && ready.len() > self.max_parallel_agents
            {
                ready.sort_by(|a, b| by_relevance(a, b));
                let overflow = ready.split_off(self.max_parallel_agents);
                std::mem::replace(&mut ready, overflow)
            } else {
                std::mem::take(&mut ready)
            };

            for req in &batch {
                for dependent in dependents
                    .get(req.agent_name.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(&requirements[*dependent]);
                        }
                    }
                }
            }

            placed += batch.len();
            levels.push(ExecutionLevel {
                index: levels.len(),
                agents: order_level(batch, strategy),
            });
        }

        if placed != requirements.len() {
            // Unreachable after detect_cycle, kept so a bug never yields a partial graph.
            let cycle = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(name, _)| name.to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            return Err(PlanningError::CyclicDependency { cycle });
        }

        Ok(levels)
    }
}

fn by_relevance(a: &AgentRequirement, b: &AgentRequirement) -> Ordering {
    b.relevance_score
        .total_cmp(&a.relevance_score)
        .then_with(|| a.agent_name.cmp(&b.agent_name))
}

fn by_strictness(a: &AgentRequirement, b: &AgentRequirement) -> Ordering {
    b.confidence_threshold
        .total_cmp(&a.confidence_threshold)
        .then_with(|| a.agent_name.cmp(&b.agent_name))
}

/// Order one level's agents for dispatch.
fn order_level(mut batch: Vec<&AgentRequirement>, strategy: OptimizationStrategy) -> Vec<String> {
    match strategy {
        OptimizationStrategy::Speed => {
            batch.sort_by(|a, b| by_relevance(a, b));
            batch.into_iter().map(|r| r.agent_name.clone()).collect()
        }
        OptimizationStrategy::Reliability => {
            batch.sort_by(|a, b| by_strictness(a, b));
            batch.into_iter().map(|r| r.agent_name.clone()).collect()
        }
        OptimizationStrategy::Resource => spread_resource_classes(batch),
    }
}

/// Round-robin across resource classes so agents sharing a class sit as far
/// apart as possible in dispatch order. Larger classes lead each round.
fn spread_resource_classes(batch: Vec<&AgentRequirement>) -> Vec<String> {
    let mut groups: BTreeMap<&str, Vec<&AgentRequirement>> = BTreeMap::new();
    for req in batch {
        groups.entry(req.resource_class()).or_default().push(req);
    }

    let mut groups: Vec<Vec<&AgentRequirement>> = groups
        .into_values()
        .map(|mut g| {
            g.sort_by(|a, b| by_relevance(a, b));
            g.reverse();
            g
        })
        .collect();
    groups.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut ordered = Vec::new();
    loop {
        let mut progressed = false;
        for group in groups.iter_mut() {
            if let Some(req) = group.pop() {
                ordered.push(req.agent_name.clone());
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    ordered
}

/// Detects cycles in the prerequisite graph using DFS.
///
/// Returns the offending cycle as a closed path (first and last element equal).
fn detect_cycle(requirements: &BTreeMap<String, AgentRequirement>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in requirements.keys() {
        if let Some(cycle) =
            dfs_cycle(node, requirements, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(cycle);
        }
    }

    None
}

fn dfs_cycle<'a>(
    node: &'a str,
    graph: &'a BTreeMap<String, AgentRequirement>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    if rec_stack.contains(node) {
        let start = path.iter().position(|n| *n == node).unwrap_or(0);
        let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(node.to_string());
        return Some(cycle);
    }

    if !visited.insert(node) {
        return None;
    }

    rec_stack.insert(node);
    path.push(node);

    if let Some(req) = graph.get(node) {
        for dep in &req.prerequisites {
            if let Some(cycle) = dfs_cycle(dep, graph, visited, rec_stack, path) {
                return Some(cycle);
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    None
}
