//! Domain error types

use crate::agent::state::AgentStatus;
use crate::session::phase::{SessionPhase, SessionStatus};
use thiserror::Error;

/// Rejected state-machine transitions.
///
/// Every mutable lifecycle in the domain (agent status, session phase,
/// session status) refuses transitions its machine does not allow instead
/// of silently overwriting state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("agent '{agent}' cannot move from {from} to {to}")]
    Agent {
        agent: String,
        from: AgentStatus,
        to: AgentStatus,
    },

    #[error("session phase cannot move from {from} to {to}")]
    Phase { from: SessionPhase, to: SessionPhase },

    #[error("session status cannot move from {from} to {to}")]
    Status {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),
}

impl TransitionError {
    /// The agent a rejected agent transition refers to, if any.
    pub fn agent(&self) -> Option<&str> {
        match self {
            TransitionError::Agent { agent, .. } | TransitionError::UnknownAgent(agent) => {
                Some(agent)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_transition_display() {
        let error = TransitionError::Agent {
            agent: "financial".to_string(),
            from: AgentStatus::Completed,
            to: AgentStatus::Running,
        };
        assert_eq!(
            error.to_string(),
            "agent 'financial' cannot move from completed to running"
        );
        assert_eq!(error.agent(), Some("financial"));
    }

    #[test]
    fn test_phase_transition_has_no_agent() {
        let error = TransitionError::Phase {
            from: SessionPhase::Completed,
            to: SessionPhase::ExecutingResearch,
        };
        assert!(error.agent().is_none());
    }
}
