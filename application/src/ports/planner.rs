//! Planner port
//!
//! Produces the initial requirement list for a query. Natural-language
//! analysis lives behind this trait.

use async_trait::async_trait;
use diligence_domain::AgentRequirement;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error("planner unavailable: {0}")]
    Unavailable(String),

    #[error("planner returned an invalid plan: {0}")]
    InvalidPlan(String),
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &str) -> Result<Vec<AgentRequirement>, PlannerError>;
}

/// Planner returning a fixed requirement list regardless of the query.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanner {
    requirements: Vec<AgentRequirement>,
}

impl StaticPlanner {
    pub fn new(requirements: Vec<AgentRequirement>) -> Self {
        Self { requirements }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _query: &str) -> Result<Vec<AgentRequirement>, PlannerError> {
        Ok(self.requirements.clone())
    }
}
