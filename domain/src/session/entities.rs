//! Research session aggregate root

use super::phase::{SessionPhase, SessionStatus};
use crate::agent::state::{AgentState, AgentStatus};
use crate::conflict::entities::{Conflict, ConflictId};
use crate::core::error::TransitionError;
use crate::finding::entities::{Finding, FindingId};
use crate::planning::graph::{ExecutionGraph, ExecutionLevel};
use crate::planning::requirement::AgentRequirement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Unique identifier of a research session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which agents delivered and which did not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completeness {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Pending or still running
    pub outstanding: Vec<String>,
}

impl Completeness {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len() + self.outstanding.len()
    }

    /// Every planned agent completed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.outstanding.is_empty()
    }

    /// Share of agents that completed (1.0 for an empty plan).
    pub fn ratio(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.completed.len() as f64 / total as f64,
        }
    }
}

/// The aggregate root: everything known about one investigation.
///
/// Only the session manager holds a mutable instance; everything else sees
/// clones. `overall_progress` is always derived from agent states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSession {
    id: SessionId,
    query: String,
    phase: SessionPhase,
    status: SessionStatus,
    /// Proposed requirements awaiting approval
    plan: Vec<AgentRequirement>,
    graph: Option<ExecutionGraph>,
    agent_states: BTreeMap<String, AgentState>,
    findings: Vec<Finding>,
    conflicts: Vec<Conflict>,
    /// Levels whose barrier has cleared
    completed_levels: usize,
    /// Last event sequence number handed out
    event_sequence: u64,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(query: impl Into<String>, plan: Vec<AgentRequirement>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            query: query.into(),
            phase: SessionPhase::Initializing,
            status: SessionStatus::Active,
            plan,
            graph: None,
            agent_states: BTreeMap::new(),
            findings: Vec::new(),
            conflicts: Vec::new(),
            completed_levels: 0,
            event_sequence: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn plan(&self) -> &[AgentRequirement] {
        &self.plan
    }

    pub fn graph(&self) -> Option<&ExecutionGraph> {
        self.graph.as_ref()
    }

    pub fn agent_states(&self) -> &BTreeMap<String, AgentState> {
        &self.agent_states
    }

    pub fn agent_state(&self, agent: &str) -> Option<&AgentState> {
        self.agent_states.get(agent)
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Findings produced by any of `agents`.
    pub fn findings_from<'a>(
        &'a self,
        agents: &'a std::collections::BTreeSet<String>,
    ) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings
            .iter()
            .filter(move |f| agents.contains(&f.agent_id))
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }

    pub fn completed_levels(&self) -> usize {
        self.completed_levels
    }

    pub fn event_sequence(&self) -> u64 {
        self.event_sequence
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Hand out the next event sequence number (monotonic, survives restore).
    pub fn next_sequence(&mut self) -> u64 {
        self.event_sequence += 1;
        self.event_sequence
    }

    /// Raise the sequence counter to at least `floor`; never lowers it.
    pub fn advance_sequence(&mut self, floor: u64) {
        self.event_sequence = self.event_sequence.max(floor);
    }

    pub fn transition_phase(&mut self, to: SessionPhase) -> Result<SessionPhase, TransitionError> {
        let from = self.phase;
        if !from.can_transition_to(to) {
            return Err(TransitionError::Phase { from, to });
        }
        self.phase = to;
        self.touch();
        Ok(from)
    }

    pub fn set_status(&mut self, to: SessionStatus) -> Result<SessionStatus, TransitionError> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(TransitionError::Status { from, to });
        }
        self.status = to;
        self.touch();
        Ok(from)
    }

    /// Replace the proposed plan (plan generation or modification).
    pub fn set_plan(&mut self, plan: Vec<AgentRequirement>) {
        self.plan = plan;
        self.touch();
    }

    /// Install an approved graph; every agent starts Pending.
    pub fn install_graph(&mut self, graph: ExecutionGraph) {
        self.agent_states = graph
            .agent_names()
            .map(|name| (name.to_string(), AgentState::pending()))
            .collect();
        self.plan = graph.requirements().cloned().collect();
        self.graph = Some(graph);
        self.completed_levels = 0;
        self.touch();
    }

    /// Apply `update` to one agent's state.
    pub fn update_agent<F>(&mut self, agent: &str, update: F) -> Result<&AgentState, TransitionError>
    where
        F: FnOnce(&mut AgentState, &str) -> Result<(), TransitionError>,
    {
        let state = self
            .agent_states
            .get_mut(agent)
            .ok_or_else(|| TransitionError::UnknownAgent(agent.to_string()))?;
        update(state, agent)?;
        self.updated_at = Utc::now();
        Ok(state)
    }

    /// Append findings not already present. Returns how many were added.
    pub fn merge_findings(&mut self, findings: Vec<Finding>) -> usize {
        let mut known: HashSet<FindingId> = self.findings.iter().map(|f| f.id).collect();
        let before = self.findings.len();
        for finding in findings {
            if known.insert(finding.id) {
                self.findings.push(finding);
            }
        }
        let added = self.findings.len() - before;
        if added > 0 {
            self.touch();
        }
        added
    }

    /// Append conflicts not already present. Returns how many were added.
    pub fn add_conflicts(&mut self, conflicts: Vec<Conflict>) -> usize {
        let mut known: HashSet<ConflictId> = self.conflicts.iter().map(|c| c.id.clone()).collect();
        let before = self.conflicts.len();
        for conflict in conflicts {
            if known.insert(conflict.id.clone()) {
                self.conflicts.push(conflict);
            }
        }
        let added = self.conflicts.len() - before;
        if added > 0 {
            self.touch();
        }
        added
    }

    /// Flip a conflict to resolved. Returns false if it is unknown.
    pub fn resolve_conflict(&mut self, id: &ConflictId) -> bool {
        match self.conflicts.iter_mut().find(|c| &c.id == id) {
            Some(conflict) => {
                conflict.resolved = true;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Mean of per-agent progress, settled agents counting as 1.0.
    pub fn overall_progress(&self) -> f64 {
        if self.agent_states.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .agent_states
            .values()
            .map(AgentState::effective_progress)
            .sum();
        sum / self.agent_states.len() as f64
    }

    pub fn completeness(&self) -> Completeness {
        let mut report = Completeness::default();
        for (name, state) in &self.agent_states {
            let bucket = match state.status {
                AgentStatus::Failed if state.awaiting_retry => &mut report.outstanding,
                AgentStatus::Completed => &mut report.completed,
                AgentStatus::Failed => &mut report.failed,
                AgentStatus::Skipped => &mut report.skipped,
                AgentStatus::Pending | AgentStatus::Running => &mut report.outstanding,
            };
            bucket.push(name.clone());
        }
        report
    }

    /// The next level to execute, if any remain.
    pub fn next_level(&self) -> Option<&ExecutionLevel> {
        self.graph.as_ref()?.level(self.completed_levels)
    }

    pub fn has_remaining_levels(&self) -> bool {
        self.next_level().is_some()
    }

    /// A pause still has work to hold back: reporting has not begun and,
    /// once a plan is installed, levels remain.
    pub fn accepts_pause(&self) -> bool {
        !matches!(
            self.phase,
            SessionPhase::GeneratingReport | SessionPhase::Completed | SessionPhase::Failed
        ) && (self.graph.is_none() || self.has_remaining_levels())
    }

    pub fn mark_level_complete(&mut self) {
        self.completed_levels += 1;
        self.touch();
    }

    /// Move to Failed (phase and status) recording `reason`. Already-finished
    /// sessions keep their state.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Failed;
        }
        if self.status.can_transition_to(SessionStatus::Failed) {
            self.status = SessionStatus::Failed;
        }
        self.failure_reason = Some(reason.into());
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::error::{AgentErrorInfo, AgentErrorKind};
    use crate::planning::graph::OptimizationStrategy;
    use crate::planning::resolver::DependencyResolver;

    fn session_with_graph() -> ResearchSession {
        let plan = vec![
            AgentRequirement::new("A"),
            AgentRequirement::new("B"),
            AgentRequirement::new("C").with_prerequisite("A").with_prerequisite("B"),
        ];
        let graph = DependencyResolver::default()
            .resolve(plan.clone(), OptimizationStrategy::Speed)
            .unwrap();
        let mut session = ResearchSession::new("Acme Corp", plan);
        session.install_graph(graph);
        session
    }

    #[test]
    fn test_install_graph_creates_pending_states() {
        let session = session_with_graph();
        assert_eq!(session.agent_states().len(), 3);
        assert!(
            session
                .agent_states()
                .values()
                .all(|s| s.status == AgentStatus::Pending)
        );
        assert_eq!(session.next_level().unwrap().agents, vec!["A", "B"]);
    }

    #[test]
    fn test_overall_progress_is_derived() {
        let mut session = session_with_graph();
        assert_eq!(session.overall_progress(), 0.0);

        session.update_agent("A", |s, n| s.start(n, None)).unwrap();
        session
            .update_agent("A", |s, n| s.report_progress(n, 0.6, None))
            .unwrap();
        session
            .update_agent("C", |s, n| {
                s.skip(n, AgentErrorInfo::new(AgentErrorKind::UpstreamFailed, "x", 0))
            })
            .unwrap();

        // (0.6 + 0.0 + 1.0) / 3
        assert!((session.overall_progress() - 1.6 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_overall_progress_does_not_drop_across_retry() {
        let mut session = session_with_graph();
        let error = AgentErrorInfo::new(AgentErrorKind::Transient, "503", 1);
        session.update_agent("A", |s, n| s.start(n, None)).unwrap();
        session
            .update_agent("A", |s, n| s.report_progress(n, 0.5, None))
            .unwrap();
        let before = session.overall_progress();

        session
            .update_agent("A", |s, n| s.fail_for_retry(n, error.clone()))
            .unwrap();
        assert_eq!(session.overall_progress(), before);
        assert_eq!(session.completeness().outstanding, vec!["A", "B", "C"]);

        session.update_agent("A", |s, n| s.start(n, None)).unwrap();
        assert_eq!(session.overall_progress(), before);

        session.update_agent("A", |s, n| s.fail(n, error)).unwrap();
        assert!((session.overall_progress() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(session.completeness().failed, vec!["A"]);
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let mut session = session_with_graph();
        let err = session.update_agent("Z", |s, n| s.start(n, None)).unwrap_err();
        assert_eq!(err, TransitionError::UnknownAgent("Z".into()));
    }

    #[test]
    fn test_merge_findings_dedupes() {
        let mut session = session_with_graph();
        let finding = Finding::new("A", "Acme", "ceo", "Jane", 0.9);
        assert_eq!(session.merge_findings(vec![finding.clone()]), 1);
        assert_eq!(session.merge_findings(vec![finding]), 0);
        assert_eq!(session.findings().len(), 1);
    }

    #[test]
    fn test_phase_transition_rejected() {
        let mut session = session_with_graph();
        let err = session.transition_phase(SessionPhase::Completed).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Phase {
                from: SessionPhase::Initializing,
                to: SessionPhase::Completed,
            }
        );
        assert_eq!(session.phase(), SessionPhase::Initializing);
    }

    #[test]
    fn test_completeness_and_levels() {
        let mut session = session_with_graph();
        session.update_agent("A", |s, n| s.start(n, None)).unwrap();
        session
            .update_agent("A", |s, n| {
                s.fail(n, AgentErrorInfo::new(AgentErrorKind::Permanent, "x", 1))
            })
            .unwrap();
        session.update_agent("B", |s, n| s.start(n, None)).unwrap();
        session.update_agent("B", |s, n| s.complete(n)).unwrap();
        session.mark_level_complete();

        let report = session.completeness();
        assert_eq!(report.completed, vec!["B"]);
        assert_eq!(report.failed, vec!["A"]);
        assert_eq!(report.outstanding, vec!["C"]);
        assert!(!report.is_complete());
        assert_eq!(session.next_level().unwrap().agents, vec!["C"]);
    }

    #[test]
    fn test_pause_accepted_only_while_levels_remain() {
        let mut session = session_with_graph();
        assert!(session.accepts_pause());

        session.mark_level_complete();
        assert!(session.accepts_pause());
        session.mark_level_complete();
        assert!(!session.accepts_pause());

        let unplanned = ResearchSession::new("Acme Corp", Vec::new());
        assert!(unplanned.accepts_pause());
    }

    #[test]
    fn test_fail_is_idempotent_on_finished_sessions() {
        let mut session = session_with_graph();
        session.fail("checkpoint store unavailable");
        assert_eq!(session.phase(), SessionPhase::Failed);
        assert_eq!(session.status(), SessionStatus::Failed);

        session.fail("again");
        assert_eq!(session.failure_reason(), Some("again"));
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut session = session_with_graph();
        assert_eq!(session.next_sequence(), 1);
        assert_eq!(session.next_sequence(), 2);
        assert_eq!(session.event_sequence(), 2);

        session.advance_sequence(100);
        session.advance_sequence(50);
        assert_eq!(session.next_sequence(), 101);
    }
}
