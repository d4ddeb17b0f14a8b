//! Session manager
//!
//! Single writer for every [`ResearchSession`]. Sessions live inside an actor
//! task; everything else holds a cloneable [`SessionManager`] handle and
//! submits [`SessionUpdate`]s over a channel. Readers receive clones.
//!
//! Every applied update is published on the [`ProgressTracker`] before any
//! checkpoint containing it is written.

use crate::config::PersistencePolicy;
use crate::ports::agent_runtime::ProgressSink;
use crate::ports::checkpoint_store::{CheckpointStore, StoreError};
use crate::progress::ProgressTracker;
use diligence_domain::{
    AgentErrorInfo, AgentErrorKind, AgentState, AgentStatus, Checkpoint, CheckpointKey, Conflict,
    EventKind, ExecutionGraph, Finding, ResearchSession, SessionEvent, SessionId, SessionPhase,
    SessionStatus, TransitionError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} already exists")]
    AlreadyExists(SessionId),

    #[error("session {id} is {status}, not active")]
    NotActive { id: SessionId, status: SessionStatus },

    #[error("session {0} has no approved plan")]
    NoPlan(SessionId),

    #[error("session {id} has no levels left to pause (phase {phase})")]
    NothingToPause { id: SessionId, phase: SessionPhase },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("checkpoint failed after {attempts} attempts: {source}")]
    CheckpointFailed { attempts: u32, source: StoreError },

    #[error("session manager stopped")]
    Stopped,
}

/// A state change submitted to the session manager.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Phase(SessionPhase),
    Status(SessionStatus),
    SetPlan(Vec<diligence_domain::AgentRequirement>),
    InstallGraph(ExecutionGraph),
    AgentStarted {
        agent: String,
        task: Option<String>,
    },
    AgentProgress {
        agent: String,
        fraction: f64,
        task: Option<String>,
    },
    AgentCompleted {
        agent: String,
    },
    /// The agent gave up
    AgentFailed {
        agent: String,
        error: AgentErrorInfo,
    },
    /// A failed attempt that will be retried, requeued or handed to a fallback
    AgentAwaitingRetry {
        agent: String,
        error: AgentErrorInfo,
    },
    AgentSkipped {
        agent: String,
        reason: AgentErrorInfo,
    },
    /// Refused unless the session is Active
    LevelStarted {
        level: usize,
    },
    /// Clears the level barrier; applies a queued pause
    LevelCompleted,
    MergeFindings(Vec<Finding>),
    AddConflicts(Vec<Conflict>),
    /// Pause now if no level is in flight, otherwise at the next barrier.
    /// Refused once no level remains.
    RequestPause,
    Fail(String),
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Sequence numbers skipped when a session is restored. Events an earlier
/// process published after its last checkpoint fall inside the gap.
pub const RESTORE_SEQUENCE_GAP: u64 = 1 << 20;

enum Command {
    Create {
        session: Box<ResearchSession>,
        reply: Reply<()>,
    },
    Restore {
        checkpoint: Box<Checkpoint>,
        reply: Reply<ResearchSession>,
    },
    Update {
        id: SessionId,
        update: SessionUpdate,
        reply: Option<Reply<()>>,
    },
    Snapshot {
        id: SessionId,
        reply: Reply<ResearchSession>,
    },
    Checkpoint {
        id: SessionId,
        reply: Reply<CheckpointKey>,
    },
}

/// Cloneable handle to the session actor.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionManager {
    /// Start the actor on the current tokio runtime.
    ///
    /// The actor stops once every handle has been dropped.
    pub fn spawn(
        store: Arc<dyn CheckpointStore>,
        tracker: Arc<ProgressTracker>,
        policy: PersistencePolicy,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let actor = SessionActor {
            sessions: HashMap::new(),
            pending_pause: HashSet::new(),
            levels_in_flight: HashSet::new(),
            last_keys: HashMap::new(),
            store,
            tracker,
            policy,
        };
        tokio::spawn(actor.run(receiver));
        Self { commands }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SessionError::Stopped)?;
        response.await.map_err(|_| SessionError::Stopped)?
    }

    /// Take ownership of a new session.
    pub async fn create(&self, session: ResearchSession) -> Result<(), SessionError> {
        self.request(|reply| Command::Create {
            session: Box::new(session),
            reply,
        })
        .await
    }

    /// Replace the in-memory session wholesale with a checkpoint's contents.
    ///
    /// Agents caught mid-attempt are marked failed (cancelled) so they rerun,
    /// and a paused session becomes active again. Sequence numbering resumes
    /// [`RESTORE_SEQUENCE_GAP`] past the checkpoint, or past the in-memory
    /// copy when that is further ahead.
    pub async fn restore(&self, checkpoint: Checkpoint) -> Result<ResearchSession, SessionError> {
        self.request(|reply| Command::Restore {
            checkpoint: Box::new(checkpoint),
            reply,
        })
        .await
    }

    pub async fn update(&self, id: SessionId, update: SessionUpdate) -> Result<(), SessionError> {
        self.request(|reply| Command::Update {
            id,
            update,
            reply: Some(reply),
        })
        .await
    }

    /// Submit an update without waiting for it to be applied.
    pub fn notify(&self, id: SessionId, update: SessionUpdate) {
        let _ = self.commands.send(Command::Update {
            id,
            update,
            reply: None,
        });
    }

    /// Read-only copy of the session.
    pub async fn snapshot(&self, id: SessionId) -> Result<ResearchSession, SessionError> {
        self.request(|reply| Command::Snapshot { id, reply }).await
    }

    /// Persist a checkpoint of the session's current state.
    ///
    /// Write failures are retried per [`PersistencePolicy`]; on exhaustion the
    /// session is marked Failed and the error returned.
    pub async fn checkpoint(&self, id: SessionId) -> Result<CheckpointKey, SessionError> {
        self.request(|reply| Command::Checkpoint { id, reply }).await
    }

    /// Progress sink routing agent reports for `id` through this manager.
    pub fn progress_sink(&self, id: SessionId) -> Arc<dyn ProgressSink> {
        Arc::new(SessionProgressSink {
            manager: self.clone(),
            session_id: id,
        })
    }
}

struct SessionProgressSink {
    manager: SessionManager,
    session_id: SessionId,
}

impl ProgressSink for SessionProgressSink {
    fn report(&self, agent: &str, fraction: f64, task: Option<String>) {
        self.manager.notify(
            self.session_id,
            SessionUpdate::AgentProgress {
                agent: agent.to_string(),
                fraction,
                task,
            },
        );
    }
}

struct SessionActor {
    sessions: HashMap<SessionId, ResearchSession>,
    pending_pause: HashSet<SessionId>,
    levels_in_flight: HashSet<SessionId>,
    last_keys: HashMap<SessionId, CheckpointKey>,
    store: Arc<dyn CheckpointStore>,
    tracker: Arc<ProgressTracker>,
    policy: PersistencePolicy,
}

/// Stamp `kind` with the session's next sequence number and publish it.
fn publish(tracker: &ProgressTracker, session: &mut ResearchSession, kind: EventKind) {
    let sequence = session.next_sequence();
    tracker.publish(SessionEvent::new(session.id(), sequence, kind));
}

fn agent_changed(session: &ResearchSession, agent: &str, state: &AgentState) -> EventKind {
    EventKind::AgentStateChanged {
        agent: agent.to_string(),
        state: state.clone(),
        overall_progress: session.overall_progress(),
    }
}

impl SessionActor {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Create { session, reply } => {
                    let _ = reply.send(self.create(*session));
                }
                Command::Restore { checkpoint, reply } => {
                    let _ = reply.send(self.restore(*checkpoint));
                }
                Command::Update { id, update, reply } => {
                    let result = self.apply(id, update);
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                debug!(session_id = %id, error = %e, "Dropped update");
                            }
                        }
                    }
                }
                Command::Snapshot { id, reply } => {
                    let snapshot = self
                        .sessions
                        .get(&id)
                        .cloned()
                        .ok_or(SessionError::NotFound(id));
                    let _ = reply.send(snapshot);
                }
                Command::Checkpoint { id, reply } => {
                    let _ = reply.send(self.checkpoint(id).await);
                }
            }
        }
        debug!("Session manager stopped");
    }

    fn create(&mut self, mut session: ResearchSession) -> Result<(), SessionError> {
        let id = session.id();
        if self.sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }
        info!(session_id = %id, query = session.query(), "Session created");
        let query = session.query().to_string();
        publish(&self.tracker, &mut session, EventKind::SessionCreated { query });
        self.sessions.insert(id, session);
        Ok(())
    }

    fn restore(&mut self, checkpoint: Checkpoint) -> Result<ResearchSession, SessionError> {
        let key = checkpoint.key;
        let mut session = checkpoint.restore();
        let id = session.id();
        let published = self
            .sessions
            .get(&id)
            .map_or(0, ResearchSession::event_sequence);
        session.advance_sequence(
            session
                .event_sequence()
                .saturating_add(RESTORE_SEQUENCE_GAP)
                .max(published),
        );
        self.pending_pause.remove(&id);
        self.levels_in_flight.remove(&id);
        self.last_keys.insert(id, key);

        let interrupted: Vec<String> = session
            .agent_states()
            .iter()
            .filter(|(_, state)| state.status == AgentStatus::Running)
            .map(|(name, _)| name.clone())
            .collect();
        for agent in interrupted {
            let attempts = session.agent_state(&agent).map_or(0, |s| s.attempts);
            let info = AgentErrorInfo::new(AgentErrorKind::Cancelled, "interrupted", attempts);
            let state = session
                .update_agent(&agent, |s, n| s.fail_for_retry(n, info))?
                .clone();
            let kind = agent_changed(&session, &agent, &state);
            publish(&self.tracker, &mut session, kind);
        }

        if session.status() == SessionStatus::Paused {
            let from = session.set_status(SessionStatus::Active)?;
            publish(
                &self.tracker,
                &mut session,
                EventKind::StatusChanged {
                    from,
                    to: SessionStatus::Active,
                },
            );
        }

        info!(session_id = %id, checkpoint = %key, "Session restored");
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    fn apply(&mut self, id: SessionId, update: SessionUpdate) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id))?;

        let events = match update {
            SessionUpdate::Phase(to) => {
                let from = session.transition_phase(to)?;
                debug!(session_id = %id, %from, %to, "Phase changed");
                vec![EventKind::PhaseChanged { from, to }]
            }
            SessionUpdate::Status(to) => {
                let from = session.set_status(to)?;
                if to != SessionStatus::Active {
                    self.pending_pause.remove(&id);
                }
                vec![EventKind::StatusChanged { from, to }]
            }
            SessionUpdate::SetPlan(plan) => {
                session.set_plan(plan);
                vec![]
            }
            SessionUpdate::InstallGraph(graph) => {
                let levels = graph.levels().len();
                let agents = graph.len();
                session.install_graph(graph);
                vec![EventKind::PlanApproved { levels, agents }]
            }
            SessionUpdate::AgentStarted { agent, task } => {
                let state = session.update_agent(&agent, |s, n| s.start(n, task))?.clone();
                vec![agent_changed(session, &agent, &state)]
            }
            SessionUpdate::AgentProgress {
                agent,
                fraction,
                task,
            } => {
                let state = session
                    .update_agent(&agent, |s, n| s.report_progress(n, fraction, task))?
                    .clone();
                vec![agent_changed(session, &agent, &state)]
            }
            SessionUpdate::AgentCompleted { agent } => {
                let state = session.update_agent(&agent, |s, n| s.complete(n))?.clone();
                vec![agent_changed(session, &agent, &state)]
            }
            SessionUpdate::AgentFailed { agent, error } => {
                let state = session.update_agent(&agent, |s, n| s.fail(n, error))?.clone();
                vec![agent_changed(session, &agent, &state)]
            }
            SessionUpdate::AgentAwaitingRetry { agent, error } => {
                let state = session
                    .update_agent(&agent, |s, n| s.fail_for_retry(n, error))?
                    .clone();
                vec![agent_changed(session, &agent, &state)]
            }
            SessionUpdate::AgentSkipped { agent, reason } => {
                let state = session.update_agent(&agent, |s, n| s.skip(n, reason))?.clone();
                vec![agent_changed(session, &agent, &state)]
            }
            SessionUpdate::LevelStarted { level } => {
                if session.status() != SessionStatus::Active {
                    return Err(SessionError::NotActive {
                        id,
                        status: session.status(),
                    });
                }
                self.levels_in_flight.insert(id);
                let agents = session
                    .graph()
                    .and_then(|g| g.level(level))
                    .map(|l| l.agents.clone())
                    .unwrap_or_default();
                vec![EventKind::LevelStarted { level, agents }]
            }
            SessionUpdate::LevelCompleted => {
                let level = session.completed_levels();
                let (mut completed, mut failed, mut skipped) = (0, 0, 0);
                if let Some(agents) = session.graph().and_then(|g| g.level(level)) {
                    for agent in &agents.agents {
                        match session.agent_state(agent).map(|s| s.status) {
                            Some(AgentStatus::Completed) => completed += 1,
                            Some(AgentStatus::Failed) => failed += 1,
                            Some(AgentStatus::Skipped) => skipped += 1,
                            _ => {}
                        }
                    }
                }
                session.mark_level_complete();
                self.levels_in_flight.remove(&id);

                let mut events = vec![EventKind::LevelCompleted {
                    level,
                    completed,
                    failed,
                    skipped,
                }];
                if self.pending_pause.remove(&id) {
                    let from = session.set_status(SessionStatus::Paused)?;
                    info!(session_id = %id, level, "Pause applied at level barrier");
                    events.push(EventKind::StatusChanged {
                        from,
                        to: SessionStatus::Paused,
                    });
                }
                events
            }
            SessionUpdate::MergeFindings(findings) => {
                let added = session.merge_findings(findings);
                vec![EventKind::FindingsMerged {
                    added,
                    total: session.findings().len(),
                }]
            }
            SessionUpdate::AddConflicts(conflicts) => {
                let added = session.add_conflicts(conflicts);
                vec![EventKind::ConflictsDetected {
                    added,
                    total: session.conflicts().len(),
                }]
            }
            SessionUpdate::RequestPause => {
                if session.status() != SessionStatus::Active {
                    return Err(SessionError::NotActive {
                        id,
                        status: session.status(),
                    });
                }
                if self.levels_in_flight.contains(&id) {
                    info!(session_id = %id, "Pause queued until level barrier");
                    self.pending_pause.insert(id);
                    vec![EventKind::PauseRequested]
                } else if !session.accepts_pause() {
                    return Err(SessionError::NothingToPause {
                        id,
                        phase: session.phase(),
                    });
                } else {
                    let from = session.set_status(SessionStatus::Paused)?;
                    vec![EventKind::StatusChanged {
                        from,
                        to: SessionStatus::Paused,
                    }]
                }
            }
            SessionUpdate::Fail(reason) => {
                let (phase, status) = (session.phase(), session.status());
                warn!(session_id = %id, reason = %reason, "Session failed");
                session.fail(reason);
                self.pending_pause.remove(&id);
                self.levels_in_flight.remove(&id);

                let mut events = Vec::new();
                if phase != session.phase() {
                    events.push(EventKind::PhaseChanged {
                        from: phase,
                        to: session.phase(),
                    });
                }
                if status != session.status() {
                    events.push(EventKind::StatusChanged {
                        from: status,
                        to: session.status(),
                    });
                }
                events
            }
        };

        for kind in events {
            publish(&self.tracker, session, kind);
        }
        Ok(())
    }

    async fn checkpoint(&mut self, id: SessionId) -> Result<CheckpointKey, SessionError> {
        if !self.sessions.contains_key(&id) {
            return Err(SessionError::NotFound(id));
        }
        let key = CheckpointKey::next_after(id, self.last_keys.get(&id));
        let max_attempts = self.policy.checkpoint_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let Some(session) = self.sessions.get_mut(&id) else {
                return Err(SessionError::NotFound(id));
            };
            // The written event's sequence is reserved before capture so a
            // restored session continues numbering after it.
            let sequence = session.next_sequence();
            let checkpoint = Checkpoint::capture(key, session);
            let is_final = checkpoint.is_final;

            match self.store.put(&checkpoint).await {
                Ok(()) => {
                    let event = SessionEvent::new(
                        id,
                        sequence,
                        EventKind::CheckpointWritten {
                            key: key.to_string(),
                            is_final,
                        },
                    );
                    self.tracker.publish(event);
                    self.last_keys.insert(id, key);
                    debug!(session_id = %id, checkpoint = %key, is_final, "Checkpoint written");
                    break;
                }
                Err(error) => {
                    warn!(session_id = %id, attempt, error = %error, "Checkpoint write failed");
                    if let Some(session) = self.sessions.get_mut(&id) {
                        publish(
                            &self.tracker,
                            session,
                            EventKind::CheckpointFailed {
                                attempt,
                                error: error.to_string(),
                            },
                        );
                    }
                    if attempt >= max_attempts {
                        self.apply(
                            id,
                            SessionUpdate::Fail(format!("checkpoint write failed: {error}")),
                        )?;
                        return Err(SessionError::CheckpointFailed {
                            attempts: attempt,
                            source: error,
                        });
                    }
                    tokio::time::sleep(self.policy.checkpoint_retry_delay).await;
                }
            }
        }

        if let Err(error) = self.prune(id).await {
            warn!(session_id = %id, error = %error, "Checkpoint retention failed");
        }
        Ok(key)
    }

    /// Keep the newest `retention` checkpoints plus any final ones.
    async fn prune(&self, id: SessionId) -> Result<(), StoreError> {
        let keys = self
            .store
            .list(&CheckpointKey::session_prefix(&id))
            .await?;
        if keys.len() <= self.policy.retention {
            return Ok(());
        }
        let expired = &keys[..keys.len() - self.policy.retention];
        for key in expired {
            let is_final = self
                .store
                .get(key)
                .await?
                .is_some_and(|checkpoint| checkpoint.is_final);
            if !is_final {
                self.store.delete(key).await?;
            }
        }
        Ok(())
    }
}
