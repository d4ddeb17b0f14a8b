//! Planning errors

use thiserror::Error;

/// Fatal planning failures.
///
/// These surface before any agent runs and are never corrected
/// automatically: the caller has to fix the plan and resolve again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("plan contains no agent requirements")]
    EmptyPlan,

    #[error("agent '{0}' is declared more than once")]
    DuplicateAgent(String),

    #[error("agent '{agent}' depends on unknown agent '{dependency}'")]
    UnknownDependency { agent: String, dependency: String },

    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("invalid requirement '{agent}': {reason}")]
    InvalidRequirement { agent: String, reason: String },
}
