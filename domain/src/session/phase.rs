//! Session phase and status state machines

use serde::{Deserialize, Serialize};

/// Where a session is in its workflow.
///
/// ```text
/// Initializing -> AnalyzingQuery -> GeneratingPlan -> AwaitingApproval
///     -> ExecutingResearch <-> ResolvingConflicts -> GeneratingReport -> Completed
/// ```
///
/// `AwaitingApproval` may return to `GeneratingPlan`, and every non-terminal
/// phase may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Initializing,
    AnalyzingQuery,
    GeneratingPlan,
    AwaitingApproval,
    ExecutingResearch,
    ResolvingConflicts,
    GeneratingReport,
    Completed,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &str {
        match self {
            SessionPhase::Initializing => "initializing",
            SessionPhase::AnalyzingQuery => "analyzing_query",
            SessionPhase::GeneratingPlan => "generating_plan",
            SessionPhase::AwaitingApproval => "awaiting_approval",
            SessionPhase::ExecutingResearch => "executing_research",
            SessionPhase::ResolvingConflicts => "resolving_conflicts",
            SessionPhase::GeneratingReport => "generating_report",
            SessionPhase::Completed => "completed",
            SessionPhase::Failed => "failed",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            SessionPhase::Initializing => "Initializing",
            SessionPhase::AnalyzingQuery => "Analyzing Query",
            SessionPhase::GeneratingPlan => "Generating Plan",
            SessionPhase::AwaitingApproval => "Awaiting Approval",
            SessionPhase::ExecutingResearch => "Executing Research",
            SessionPhase::ResolvingConflicts => "Resolving Conflicts",
            SessionPhase::GeneratingReport => "Generating Report",
            SessionPhase::Completed => "Completed",
            SessionPhase::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed)
    }

    pub fn can_transition_to(&self, to: SessionPhase) -> bool {
        use SessionPhase::*;
        if to == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Initializing, AnalyzingQuery)
                | (AnalyzingQuery, GeneratingPlan)
                | (GeneratingPlan, AwaitingApproval)
                | (AwaitingApproval, GeneratingPlan)
                | (AwaitingApproval, ExecutingResearch)
                | (ExecutingResearch, ResolvingConflicts)
                | (ResolvingConflicts, ExecutingResearch)
                | (ResolvingConflicts, GeneratingReport)
                | (GeneratingReport, Completed)
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a session, orthogonal to its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Failed,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Archived => "archived",
        }
    }

    /// Completed, Failed or Archived: no further execution happens.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Archived
        )
    }

    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Active, Paused)
                | (Paused, Active)
                | (Active, Completed)
                | (Active, Failed)
                | (Paused, Failed)
                | (Completed, Archived)
                | (Failed, Archived)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "archived" => Ok(SessionStatus::Archived),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_path() {
        use SessionPhase::*;
        let path = [
            Initializing,
            AnalyzingQuery,
            GeneratingPlan,
            AwaitingApproval,
            ExecutingResearch,
            ResolvingConflicts,
            ExecutingResearch,
            ResolvingConflicts,
            GeneratingReport,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_plan_rejection_loop() {
        assert!(SessionPhase::AwaitingApproval.can_transition_to(SessionPhase::GeneratingPlan));
        assert!(!SessionPhase::ExecutingResearch.can_transition_to(SessionPhase::GeneratingPlan));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        assert!(SessionPhase::ExecutingResearch.can_transition_to(SessionPhase::Failed));
        assert!(!SessionPhase::Completed.can_transition_to(SessionPhase::Failed));
        assert!(!SessionPhase::Failed.can_transition_to(SessionPhase::Failed));
    }

    #[test]
    fn test_no_skipping_ahead() {
        assert!(!SessionPhase::Initializing.can_transition_to(SessionPhase::ExecutingResearch));
        assert!(!SessionPhase::ExecutingResearch.can_transition_to(SessionPhase::Completed));
    }

    #[test]
    fn test_status_machine() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Paused));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Paused.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Completed.can_transition_to(SessionStatus::Archived));
        assert!(!SessionStatus::Archived.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Archived.is_finished());
    }
}
