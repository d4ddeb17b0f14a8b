//! Planning domain: agent requirements and their execution graph.
//!
//! - [`requirement::AgentRequirement`] - one unit of planned work
//! - [`graph::ExecutionGraph`] - the dependency DAG partitioned into levels
//! - [`resolver::DependencyResolver`] - validates requirements and builds the graph
//! - [`error::PlanningError`] - fatal planning failures

pub mod error;
pub mod graph;
pub mod requirement;
pub mod resolver;
