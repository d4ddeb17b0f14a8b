//! Execute plan use case
//!
//! Runs an approved execution graph level by level. Levels are a strict
//! barrier: level `k + 1` starts only after every task of level `k` reached a
//! terminal state. Within a level each agent is an independent task; a
//! session-wide semaphore bounds how many run at once.
//!
//! After each level the manager merges findings, runs one conflict pass,
//! checkpoints, and decides whether to continue.

use crate::config::ExecutionPolicy;
use crate::ports::agent_runtime::{Agent, AgentContext, ProgressHandle};
use crate::registry::AgentRegistry;
use crate::use_cases::session_manager::{SessionError, SessionManager, SessionUpdate};
use diligence_domain::{
    AgentErrorInfo, AgentErrorKind, AgentRequirement, AgentState, AgentStatus, AgentTaskError,
    ConflictDetector, ExecutionLevel, Finding, ResearchSession, SessionId, SessionPhase,
    SessionStatus,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one agent ended up in this level.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub agent: String,
    pub status: AgentStatus,
    pub attempts: u32,
    /// Findings that met the confidence threshold
    pub findings: Vec<Finding>,
    /// Findings dropped for falling below the confidence threshold
    pub discarded: usize,
    pub error: Option<AgentErrorInfo>,
}

impl AgentOutcome {
    fn failed(agent: impl Into<String>, error: AgentErrorInfo) -> Self {
        Self {
            agent: agent.into(),
            status: AgentStatus::Failed,
            attempts: error.attempts,
            findings: Vec::new(),
            discarded: 0,
            error: Some(error),
        }
    }

    fn skipped(agent: impl Into<String>, reason: AgentErrorInfo) -> Self {
        Self {
            status: AgentStatus::Skipped,
            ..Self::failed(agent, reason)
        }
    }

    /// Outcome of an agent that already reached a final state earlier.
    fn settled(agent: &str, state: &AgentState) -> Self {
        Self {
            agent: agent.to_string(),
            status: state.status,
            attempts: state.attempts,
            findings: Vec::new(),
            discarded: 0,
            error: state.error_info.clone(),
        }
    }
}

/// Aggregated outcomes of one level, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelResult {
    pub level: usize,
    pub outcomes: Vec<AgentOutcome>,
}

impl LevelResult {
    /// New findings from every agent of the level.
    pub fn findings(&self) -> Vec<Finding> {
        self.outcomes
            .iter()
            .flat_map(|o| o.findings.iter().cloned())
            .collect()
    }

    pub fn count(&self, status: AgentStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn outcome(&self, agent: &str) -> Option<&AgentOutcome> {
        self.outcomes.iter().find(|o| o.agent == agent)
    }
}

/// Why plan execution stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Every level ran
    Completed,
    /// A pause took effect at a level barrier
    Paused,
    /// Cancellation, critical-agent failure or lost persistence
    Aborted(String),
}

pub struct ExecutionManager {
    registry: Arc<AgentRegistry>,
    policy: Arc<ExecutionPolicy>,
    sessions: SessionManager,
}

impl ExecutionManager {
    pub fn new(registry: Arc<AgentRegistry>, policy: ExecutionPolicy, sessions: SessionManager) -> Self {
        Self {
            registry,
            policy: Arc::new(policy),
            sessions,
        }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Drive the session's remaining levels in order.
    pub async fn execute_plan(
        &self,
        session_id: SessionId,
        detector: &mut ConflictDetector,
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome, SessionError> {
        let semaphore = Arc::new(Semaphore::new(self.policy.max_parallel_agents.max(1)));

        loop {
            if cancel.is_cancelled() {
                return Ok(PlanOutcome::Aborted("cancelled".to_string()));
            }

            let session = self.sessions.snapshot(session_id).await?;
            if session.status() == SessionStatus::Paused {
                return Ok(PlanOutcome::Paused);
            }
            let Some(level) = session.next_level().cloned() else {
                return Ok(PlanOutcome::Completed);
            };

            if session.phase() == SessionPhase::ResolvingConflicts {
                self.sessions
                    .update(session_id, SessionUpdate::Phase(SessionPhase::ExecutingResearch))
                    .await?;
            }
            match self
                .sessions
                .update(session_id, SessionUpdate::LevelStarted { level: level.index })
                .await
            {
                Ok(()) => {}
                Err(SessionError::NotActive {
                    status: SessionStatus::Paused,
                    ..
                }) => return Ok(PlanOutcome::Paused),
                Err(e) => return Err(e),
            }

            info!(
                session_id = %session_id,
                level = level.index,
                agents = level.len(),
                "Executing level"
            );
            let result = self.execute_level(&level, &session, &semaphore, cancel).await?;
            info!(
                session_id = %session_id,
                level = level.index,
                completed = result.count(AgentStatus::Completed),
                failed = result.count(AgentStatus::Failed),
                skipped = result.count(AgentStatus::Skipped),
                "Level finished"
            );

            let findings = result.findings();
            self.sessions
                .update(session_id, SessionUpdate::MergeFindings(findings.clone()))
                .await?;

            self.sessions
                .update(session_id, SessionUpdate::Phase(SessionPhase::ResolvingConflicts))
                .await?;
            let conflicts = detector.detect_conflicts(&findings);
            if !conflicts.is_empty() {
                info!(session_id = %session_id, count = conflicts.len(), "Conflicts detected");
            }
            self.sessions
                .update(session_id, SessionUpdate::AddConflicts(conflicts))
                .await?;
            self.sessions
                .update(session_id, SessionUpdate::LevelCompleted)
                .await?;

            if let Err(e) = self.sessions.checkpoint(session_id).await {
                return match e {
                    SessionError::CheckpointFailed { .. } => Ok(PlanOutcome::Aborted(e.to_string())),
                    other => Err(other),
                };
            }

            if cancel.is_cancelled() {
                return Ok(PlanOutcome::Aborted("cancelled".to_string()));
            }
            let session = self.sessions.snapshot(session_id).await?;
            if let Some(reason) = self.critical_failure(&session) {
                warn!(session_id = %session_id, %reason, "Aborting execution");
                return Ok(PlanOutcome::Aborted(reason));
            }
        }
    }

    /// Abort reason when every configured critical agent failed or was skipped.
    fn critical_failure(&self, session: &ResearchSession) -> Option<String> {
        let critical: Vec<(&String, &AgentState)> = self
            .policy
            .critical_agents
            .iter()
            .filter_map(|name| session.agent_state(name).map(|state| (name, state)))
            .collect();
        let all_lost = !critical.is_empty()
            && critical
                .iter()
                .all(|(_, s)| matches!(s.status, AgentStatus::Failed | AgentStatus::Skipped));
        all_lost.then(|| {
            let names: Vec<&str> = critical.iter().map(|(n, _)| n.as_str()).collect();
            format!("all critical agents failed: {}", names.join(", "))
        })
    }

    /// Run every agent of `level` to a terminal state.
    ///
    /// `session` is the snapshot taken at the level boundary; prerequisite
    /// states and upstream findings come from it.
    pub async fn execute_level(
        &self,
        level: &ExecutionLevel,
        session: &ResearchSession,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<LevelResult, SessionError> {
        let session_id = session.id();
        let graph = session.graph().ok_or(SessionError::NoPlan(session_id))?;
        let query: Arc<str> = Arc::from(session.query());
        let mut outcomes = Vec::with_capacity(level.len());
        let mut join_set = JoinSet::new();

        for agent in &level.agents {
            let Some(requirement) = graph.requirement(agent) else {
                continue;
            };
            let state = session.agent_state(agent);
            if let Some(state) = state
                && !needs_run(state)
            {
                debug!(agent = %agent, status = %state.status, "Already settled");
                outcomes.push(AgentOutcome::settled(agent, state));
                continue;
            }

            let blocked_by = requirement.prerequisites.iter().find(|p| {
                session
                    .agent_state(p)
                    .is_some_and(|s| matches!(s.status, AgentStatus::Failed | AgentStatus::Skipped))
            });
            if let Some(blocked_by) = blocked_by {
                let reason = AgentErrorInfo::new(
                    AgentErrorKind::UpstreamFailed,
                    format!("prerequisite '{blocked_by}' did not complete"),
                    0,
                );
                info!(agent = %agent, blocked_by = %blocked_by, "Skipping agent");
                self.sessions
                    .update(
                        session_id,
                        SessionUpdate::AgentSkipped {
                            agent: agent.clone(),
                            reason: reason.clone(),
                        },
                    )
                    .await?;
                outcomes.push(AgentOutcome::skipped(agent.as_str(), reason));
                continue;
            }

            let Some(implementation) = self.registry.create(requirement) else {
                let error = AgentErrorInfo::new(
                    AgentErrorKind::NotRegistered,
                    format!("no agent registered under '{}'", requirement.registry_key()),
                    0,
                );
                warn!(agent = %agent, key = requirement.registry_key(), "No agent implementation");
                if state.is_none_or(|s| s.status != AgentStatus::Failed) {
                    self.sessions
                        .update(
                            session_id,
                            SessionUpdate::AgentFailed {
                                agent: agent.clone(),
                                error: error.clone(),
                            },
                        )
                        .await?;
                }
                outcomes.push(AgentOutcome::failed(agent.as_str(), error));
                continue;
            };

            let upstream: Arc<[Finding]> = session
                .findings_from(&graph.ancestors(agent))
                .cloned()
                .collect();
            let task = AgentTask {
                session_id,
                agent: agent.clone(),
                requirement: requirement.clone(),
                primary: implementation,
                registry: Arc::clone(&self.registry),
                policy: Arc::clone(&self.policy),
                sessions: self.sessions.clone(),
                semaphore: Arc::clone(semaphore),
                cancel: cancel.clone(),
                upstream,
                query: Arc::clone(&query),
                prior_attempts: state.map_or(0, |s| s.attempts),
            };

            let name = agent.clone();
            let sessions = self.sessions.clone();
            let prior_attempts = task.prior_attempts;
            join_set.spawn(async move {
                match AssertUnwindSafe(task.run()).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let attempts = sessions
                            .snapshot(session_id)
                            .await
                            .ok()
                            .and_then(|s| s.agent_state(&name).map(|state| state.attempts))
                            .unwrap_or(prior_attempts);
                        let error =
                            AgentErrorInfo::new(AgentErrorKind::Permanent, "agent panicked", attempts);
                        sessions.notify(
                            session_id,
                            SessionUpdate::AgentFailed {
                                agent: name.clone(),
                                error: error.clone(),
                            },
                        );
                        AgentOutcome::failed(name, error)
                    }
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(session_id = %session_id, error = %e, "Agent task aborted"),
            }
        }

        outcomes.sort_by_key(|o| {
            level
                .agents
                .iter()
                .position(|a| a == &o.agent)
                .unwrap_or(usize::MAX)
        });
        Ok(LevelResult {
            level: level.index,
            outcomes,
        })
    }
}

/// Pending agents run; agents interrupted by a restart run again.
fn needs_run(state: &AgentState) -> bool {
    match state.status {
        AgentStatus::Pending => true,
        AgentStatus::Failed => {
            state.awaiting_retry
                || state
                    .error_info
                    .as_ref()
                    .is_some_and(|e| e.kind == AgentErrorKind::Cancelled)
        }
        _ => false,
    }
}

/// One agent requirement's journey through attempts, retries and fallbacks.
struct AgentTask {
    session_id: SessionId,
    agent: String,
    requirement: AgentRequirement,
    primary: Arc<dyn Agent>,
    registry: Arc<AgentRegistry>,
    policy: Arc<ExecutionPolicy>,
    sessions: SessionManager,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    upstream: Arc<[Finding]>,
    query: Arc<str>,
    prior_attempts: u32,
}

impl AgentTask {
    async fn run(self) -> AgentOutcome {
        let mut current = Arc::clone(&self.primary);
        let mut attempts = self.prior_attempts;
        let mut retries = 0;
        let mut requeues = 0;
        let mut reconfigured = false;
        let mut on_fallback = false;

        loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.give_up(AgentTaskError::Cancelled, attempts).await;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return self.give_up(AgentTaskError::Cancelled, attempts).await,
                },
            };

            attempts += 1;
            let started = self
                .sessions
                .update(
                    self.session_id,
                    SessionUpdate::AgentStarted {
                        agent: self.agent.clone(),
                        task: Some(format!("attempt {attempts}")),
                    },
                )
                .await;
            if let Err(e) = started {
                warn!(agent = %self.agent, error = %e, "Could not start agent");
                return AgentOutcome::failed(
                    self.agent.as_str(),
                    AgentErrorInfo::new(AgentErrorKind::Permanent, e.to_string(), attempts),
                );
            }

            debug!(agent = %self.agent, attempt = attempts, "Agent attempt");
            let result = self.attempt(&current, attempts).await;
            drop(permit);

            let error = match result {
                Ok(findings) => return self.succeed(findings, attempts).await,
                Err(error) => error,
            };

            match &error {
                AgentTaskError::RateLimited { retry_after, .. }
                    if requeues < self.policy.max_rate_limit_requeues =>
                {
                    requeues += 1;
                    let delay = retry_after.unwrap_or(self.policy.rate_limit_fallback_delay);
                    info!(agent = %self.agent, ?delay, requeues, "Rate limited, requeueing");
                    self.record_failure(&error, attempts).await;
                    if !self.pause_for(delay).await {
                        return self.give_up(AgentTaskError::Cancelled, attempts).await;
                    }
                    continue;
                }
                e if e.is_retryable() && retries < self.policy.retry_attempts => {
                    retries += 1;
                    let delay = self.policy.backoff_for(retries);
                    info!(agent = %self.agent, error = %e, retry = retries, ?delay, "Retrying agent");
                    self.record_failure(&error, attempts).await;
                    if !self.pause_for(delay).await {
                        return self.give_up(AgentTaskError::Cancelled, attempts).await;
                    }
                    continue;
                }
                AgentTaskError::DataUnavailable(_) if !on_fallback => {
                    let fallback = self
                        .policy
                        .fallback_agents
                        .get(&self.agent)
                        .and_then(|key| {
                            self.registry
                                .create_with_key(key, &self.requirement)
                                .map(|agent| (key, agent))
                        });
                    if let Some((key, fallback)) = fallback {
                        info!(agent = %self.agent, fallback = %key, "Data unavailable, switching to fallback");
                        on_fallback = true;
                        current = fallback;
                        self.record_failure(&error, attempts).await;
                        continue;
                    }
                }
                AgentTaskError::Configuration(_) if !reconfigured => {
                    reconfigured = true;
                    match current.reconfigure().await {
                        Ok(()) => {
                            info!(agent = %self.agent, "Reconfigured, retrying once");
                            self.record_failure(&error, attempts).await;
                            continue;
                        }
                        Err(e) => {
                            warn!(agent = %self.agent, error = %e, "Reconfiguration failed");
                        }
                    }
                }
                _ => {}
            }

            return self.give_up(error, attempts).await;
        }
    }

    /// One attempt under the per-task timeout and session cancellation.
    async fn attempt(
        &self,
        agent: &Arc<dyn Agent>,
        attempt: u32,
    ) -> Result<Vec<Finding>, AgentTaskError> {
        let timeout = self.policy.attempt_timeout(&self.requirement);
        let token = self.cancel.child_token();
        let ctx = AgentContext {
            session_id: self.session_id,
            query: Arc::clone(&self.query),
            cancellation: token.clone(),
            attempt,
            progress: ProgressHandle::new(
                self.agent.as_str(),
                self.sessions.progress_sink(self.session_id),
            ),
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(AgentTaskError::Cancelled),
            outcome = tokio::time::timeout(timeout, agent.execute(&ctx, &self.requirement, &self.upstream)) => {
                outcome.unwrap_or_else(|_| Err(AgentTaskError::Timeout(timeout)))
            }
        };
        // Tell a timed-out agent to stop whatever it still has in flight.
        token.cancel();
        result
    }

    async fn succeed(&self, findings: Vec<Finding>, attempts: u32) -> AgentOutcome {
        let (accepted, rejected): (Vec<Finding>, Vec<Finding>) = findings
            .into_iter()
            .map(|f| f.attributed_to(self.agent.as_str()))
            .partition(|f| self.requirement.accepts_confidence(f.confidence));
        if !rejected.is_empty() {
            debug!(
                agent = %self.agent,
                discarded = rejected.len(),
                threshold = self.requirement.confidence_threshold,
                "Discarded low-confidence findings"
            );
        }

        if let Err(e) = self
            .sessions
            .update(
                self.session_id,
                SessionUpdate::AgentCompleted {
                    agent: self.agent.clone(),
                },
            )
            .await
        {
            warn!(agent = %self.agent, error = %e, "Could not record completion");
        }

        AgentOutcome {
            agent: self.agent.clone(),
            status: AgentStatus::Completed,
            attempts,
            findings: accepted,
            discarded: rejected.len(),
            error: None,
        }
    }

    /// Mark the agent Failed between attempts (Failed -> Running on retry).
    async fn record_failure(&self, error: &AgentTaskError, attempts: u32) {
        let update = SessionUpdate::AgentAwaitingRetry {
            agent: self.agent.clone(),
            error: AgentErrorInfo::from_error(error, attempts),
        };
        if let Err(e) = self.sessions.update(self.session_id, update).await {
            debug!(agent = %self.agent, error = %e, "Could not record failed attempt");
        }
    }

    async fn give_up(&self, error: AgentTaskError, attempts: u32) -> AgentOutcome {
        let info = AgentErrorInfo::from_error(&error, attempts);
        warn!(agent = %self.agent, error = %error, attempts, "Agent failed");
        // Cancelled between attempts: the agent settles with its earlier error.
        let update = SessionUpdate::AgentFailed {
            agent: self.agent.clone(),
            error: info.clone(),
        };
        if let Err(e) = self.sessions.update(self.session_id, update).await {
            debug!(agent = %self.agent, error = %e, "Failure not recorded");
        }
        AgentOutcome::failed(self.agent.as_str(), info)
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause_for(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
