//! Per-agent execution state

use super::error::AgentErrorInfo;
use crate::core::error::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one agent within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Waiting for its level to be scheduled
    #[default]
    Pending,
    Running,
    Completed,
    /// Retries exhausted or a permanent error
    Failed,
    /// A prerequisite failed upstream
    Skipped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Skipped
        )
    }

    /// Forward-only, except Failed -> Running on retry.
    pub fn can_transition_to(&self, to: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Running)
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live state of one agent.
///
/// Mutated only through the session aggregate; every mutator validates the
/// status transition first and leaves the state untouched when it is refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    /// 0.0 - 1.0
    pub progress_fraction: f64,
    pub current_task: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub error_info: Option<AgentErrorInfo>,
    /// Attempts started so far
    pub attempts: u32,
    /// Failed, but another attempt is scheduled
    #[serde(default)]
    pub awaiting_retry: bool,
    /// Progress reached by earlier attempts; a retry never counts for less
    #[serde(default)]
    pub progress_floor: f64,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::pending()
    }
}

impl AgentState {
    pub fn pending() -> Self {
        Self {
            status: AgentStatus::Pending,
            progress_fraction: 0.0,
            current_task: None,
            last_updated: Utc::now(),
            error_info: None,
            attempts: 0,
            awaiting_retry: false,
            progress_floor: 0.0,
        }
    }

    /// Settled for good. A failure with a retry scheduled is not.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() && !self.awaiting_retry
    }

    /// Progress counted towards the session total.
    ///
    /// Settled agents count as done. Between attempts an agent holds the
    /// progress it had reached, so the total never moves backwards.
    pub fn effective_progress(&self) -> f64 {
        if self.is_terminal() {
            1.0
        } else {
            self.progress_fraction.max(self.progress_floor)
        }
    }

    fn transition(&mut self, agent: &str, to: AgentStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Agent {
                agent: agent.to_string(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Begin an attempt. Clears progress and any previous error.
    pub fn start(&mut self, agent: &str, task: Option<String>) -> Result<(), TransitionError> {
        self.transition(agent, AgentStatus::Running)?;
        self.awaiting_retry = false;
        self.attempts += 1;
        self.progress_fraction = 0.0;
        self.current_task = task;
        self.error_info = None;
        Ok(())
    }

    /// Report progress from a running agent. `fraction` is clamped to 0.0 - 1.0.
    pub fn report_progress(
        &mut self,
        agent: &str,
        fraction: f64,
        task: Option<String>,
    ) -> Result<(), TransitionError> {
        if self.status != AgentStatus::Running {
            return Err(TransitionError::Agent {
                agent: agent.to_string(),
                from: self.status,
                to: AgentStatus::Running,
            });
        }
        if fraction.is_finite() {
            self.progress_fraction = fraction.clamp(0.0, 1.0);
        }
        if task.is_some() {
            self.current_task = task;
        }
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, agent: &str) -> Result<(), TransitionError> {
        self.transition(agent, AgentStatus::Completed)?;
        self.progress_fraction = 1.0;
        self.current_task = None;
        Ok(())
    }

    /// Give up on the agent.
    ///
    /// An agent already failed and awaiting a retry is settled in place and
    /// keeps the error of its last attempt.
    pub fn fail(&mut self, agent: &str, error: AgentErrorInfo) -> Result<(), TransitionError> {
        if self.status == AgentStatus::Failed && self.awaiting_retry {
            self.awaiting_retry = false;
            self.last_updated = Utc::now();
            return Ok(());
        }
        self.transition(agent, AgentStatus::Failed)?;
        self.error_info = Some(error);
        self.current_task = None;
        Ok(())
    }

    /// Record a failed attempt that will be retried, requeued or handed to a
    /// fallback.
    pub fn fail_for_retry(
        &mut self,
        agent: &str,
        error: AgentErrorInfo,
    ) -> Result<(), TransitionError> {
        let reached = self.effective_progress();
        self.transition(agent, AgentStatus::Failed)?;
        self.progress_floor = reached;
        self.awaiting_retry = true;
        self.error_info = Some(error);
        self.current_task = None;
        Ok(())
    }

    pub fn skip(&mut self, agent: &str, reason: AgentErrorInfo) -> Result<(), TransitionError> {
        self.transition(agent, AgentStatus::Skipped)?;
        self.progress_fraction = 1.0;
        self.error_info = Some(reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::error::AgentErrorKind;

    fn permanent() -> AgentErrorInfo {
        AgentErrorInfo::new(AgentErrorKind::Permanent, "boom", 1)
    }

    #[test]
    fn test_happy_path() {
        let mut state = AgentState::pending();
        state.start("a", Some("searching".into())).unwrap();
        assert_eq!(state.status, AgentStatus::Running);
        assert_eq!(state.attempts, 1);

        state.report_progress("a", 0.4, None).unwrap();
        assert_eq!(state.progress_fraction, 0.4);
        assert_eq!(state.current_task.as_deref(), Some("searching"));

        state.complete("a").unwrap();
        assert_eq!(state.status, AgentStatus::Completed);
        assert_eq!(state.progress_fraction, 1.0);
    }

    #[test]
    fn test_retry_from_failed() {
        let mut state = AgentState::pending();
        state.start("a", None).unwrap();
        state.fail("a", permanent()).unwrap();
        state.start("a", None).unwrap();
        assert_eq!(state.attempts, 2);
        assert!(state.error_info.is_none());
    }

    #[test]
    fn test_retry_holds_progress_until_given_up() {
        let mut state = AgentState::pending();
        state.start("a", None).unwrap();
        state.report_progress("a", 0.6, None).unwrap();
        state.fail_for_retry("a", permanent()).unwrap();
        assert!(!state.is_terminal());
        assert_eq!(state.effective_progress(), 0.6);

        state.start("a", None).unwrap();
        assert!(!state.awaiting_retry);
        assert_eq!(state.progress_fraction, 0.0);
        assert_eq!(state.effective_progress(), 0.6);
        state.report_progress("a", 0.8, None).unwrap();
        assert_eq!(state.effective_progress(), 0.8);

        state.fail_for_retry("a", permanent()).unwrap();
        state.fail("a", AgentErrorInfo::new(AgentErrorKind::Cancelled, "stop", 2)).unwrap();
        assert!(state.is_terminal());
        assert_eq!(state.effective_progress(), 1.0);
        assert_eq!(state.error_info.as_ref().map(|e| e.kind), Some(AgentErrorKind::Permanent));
    }

    #[test]
    fn test_given_up_failure_is_final_until_restarted() {
        let mut state = AgentState::pending();
        state.start("a", None).unwrap();
        state.fail("a", permanent()).unwrap();
        assert!(state.is_terminal());
        assert!(state.fail("a", permanent()).is_err());
    }

    #[test]
    fn test_completed_is_final() {
        let mut state = AgentState::pending();
        state.start("a", None).unwrap();
        state.complete("a").unwrap();

        let err = state.start("a", None).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Agent {
                agent: "a".into(),
                from: AgentStatus::Completed,
                to: AgentStatus::Running,
            }
        );
        assert_eq!(state.status, AgentStatus::Completed);
        assert_eq!(state.attempts, 1);
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut state = AgentState::pending();
        state.start("a", None).unwrap();
        assert!(state.skip("a", permanent()).is_err());

        let mut pending = AgentState::pending();
        pending.skip("b", permanent()).unwrap();
        assert_eq!(pending.status, AgentStatus::Skipped);
        assert_eq!(pending.effective_progress(), 1.0);
    }

    #[test]
    fn test_progress_requires_running_and_clamps() {
        let mut state = AgentState::pending();
        assert!(state.report_progress("a", 0.5, None).is_err());

        state.start("a", None).unwrap();
        state.report_progress("a", 7.0, None).unwrap();
        assert_eq!(state.progress_fraction, 1.0);
        state.report_progress("a", f64::NAN, None).unwrap();
        assert_eq!(state.progress_fraction, 1.0);
    }
}
