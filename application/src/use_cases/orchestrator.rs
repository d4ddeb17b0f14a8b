//! Research orchestrator
//!
//! Facade over planning, execution, persistence and progress reporting.
//! One orchestrator drives any number of sessions; each session has its own
//! worker pool and cancellation token while it executes.

use crate::config::OrchestratorConfig;
use crate::ports::checkpoint_store::{CheckpointStore, StoreError};
use crate::ports::event_subscriber::EventSubscriber;
use crate::ports::planner::{Planner, PlannerError};
use crate::ports::report_generator::{NoReport, ReportGenerator};
use crate::progress::{ProgressTracker, SessionEventStream, SubscriptionId};
use crate::registry::AgentRegistry;
use crate::use_cases::execute_plan::{ExecutionManager, PlanOutcome};
use crate::use_cases::session_manager::{SessionError, SessionManager, SessionUpdate};
use chrono::{DateTime, Utc};
use diligence_domain::{
    AgentRequirement, Completeness, ConflictDetector, DependencyResolver, ExecutionGraph,
    PlanningError, ResearchSession, SessionId, SessionPhase, SessionStatus, Topic,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid plan: {0}")]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),

    #[error("session {0} is already executing")]
    AlreadyRunning(SessionId),

    #[error("session {id} is {status} and cannot be resumed")]
    NotResumable { id: SessionId, status: SessionStatus },

    #[error("session {id} is in phase {phase}, not ready to execute")]
    NotExecutable { id: SessionId, phase: SessionPhase },

    #[error("no planner configured")]
    NoPlanner,
}

/// One line of `list_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub query: String,
    pub phase: SessionPhase,
    pub status: SessionStatus,
    pub overall_progress: f64,
    pub completeness: Completeness,
    pub findings: usize,
    pub conflicts: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ResearchSession> for SessionSummary {
    fn from(session: &ResearchSession) -> Self {
        Self {
            id: session.id(),
            query: session.query().to_string(),
            phase: session.phase(),
            status: session.status(),
            overall_progress: session.overall_progress(),
            completeness: session.completeness(),
            findings: session.findings().len(),
            conflicts: session.conflicts().len(),
            created_at: session.created_at(),
            updated_at: session.updated_at(),
        }
    }
}

pub struct ResearchOrchestrator {
    config: OrchestratorConfig,
    resolver: DependencyResolver,
    planner: Option<Arc<dyn Planner>>,
    reports: Arc<dyn ReportGenerator>,
    store: Arc<dyn CheckpointStore>,
    tracker: Arc<ProgressTracker>,
    sessions: SessionManager,
    executor: ExecutionManager,
    running: Mutex<HashMap<SessionId, CancellationToken>>,
}

impl ResearchOrchestrator {
    /// Must be called inside a Tokio runtime: the session manager task is
    /// spawned here.
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<AgentRegistry>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let tracker = Arc::new(ProgressTracker::new());
        let sessions = SessionManager::spawn(
            Arc::clone(&store),
            Arc::clone(&tracker),
            config.persistence.clone(),
        );
        let executor = ExecutionManager::new(registry, config.execution.clone(), sessions.clone());
        Self {
            resolver: DependencyResolver::new(config.execution.max_parallel_agents),
            config,
            planner: None,
            reports: Arc::new(NoReport),
            store,
            tracker,
            sessions,
            executor,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_report_generator(mut self, reports: Arc<dyn ReportGenerator>) -> Self {
        self.reports = reports;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventSubscriber>) -> SubscriptionId {
        self.tracker.subscribe(topic, handler)
    }

    pub fn subscribe_all(&self, handler: Arc<dyn EventSubscriber>) -> SubscriptionId {
        self.tracker.subscribe_all(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.tracker.unsubscribe(id)
    }

    /// Events of one session as a stream.
    pub fn subscribe_stream(&self, session_id: SessionId) -> SessionEventStream {
        self.tracker.subscribe_stream(session_id)
    }

    /// Ask the configured planner for requirements, then start a session.
    pub async fn plan_and_start(&self, query: &str) -> Result<SessionId, OrchestratorError> {
        let planner = self.planner.as_ref().ok_or(OrchestratorError::NoPlanner)?;
        let requirements = planner.plan(query).await?;
        self.start_session(query, requirements).await
    }

    /// Create a session whose plan awaits approval.
    ///
    /// The plan is validated first: a cyclic or dangling plan fails here
    /// without creating anything.
    pub async fn start_session(
        &self,
        query: &str,
        requirements: Vec<AgentRequirement>,
    ) -> Result<SessionId, OrchestratorError> {
        let graph = self
            .resolver
            .resolve(requirements.clone(), self.config.strategy)?;

        let session = ResearchSession::new(query, requirements);
        let id = session.id();
        self.sessions.create(session).await?;
        info!(
            session_id = %id,
            agents = graph.len(),
            levels = graph.levels().len(),
            "Session started"
        );

        for phase in [
            SessionPhase::AnalyzingQuery,
            SessionPhase::GeneratingPlan,
            SessionPhase::AwaitingApproval,
        ] {
            self.sessions.update(id, SessionUpdate::Phase(phase)).await?;
        }
        self.sessions.checkpoint(id).await?;
        Ok(id)
    }

    /// Approve the proposed plan, or a modified one, and build its graph.
    pub async fn approve_plan(
        &self,
        id: SessionId,
        modifications: Option<Vec<AgentRequirement>>,
    ) -> Result<ExecutionGraph, OrchestratorError> {
        let session = self.sessions.snapshot(id).await?;
        if session.phase() != SessionPhase::AwaitingApproval {
            return Err(OrchestratorError::NotExecutable {
                id,
                phase: session.phase(),
            });
        }

        let plan = modifications
            .clone()
            .unwrap_or_else(|| session.plan().to_vec());
        let graph = self.resolver.resolve(plan, self.config.strategy)?;

        if let Some(plan) = modifications {
            info!(session_id = %id, agents = plan.len(), "Plan modified");
            self.sessions
                .update(id, SessionUpdate::Phase(SessionPhase::GeneratingPlan))
                .await?;
            self.sessions.update(id, SessionUpdate::SetPlan(plan)).await?;
            self.sessions
                .update(id, SessionUpdate::Phase(SessionPhase::AwaitingApproval))
                .await?;
        }

        self.sessions
            .update(id, SessionUpdate::InstallGraph(graph.clone()))
            .await?;
        self.sessions
            .update(id, SessionUpdate::Phase(SessionPhase::ExecutingResearch))
            .await?;
        self.sessions.checkpoint(id).await?;
        info!(
            session_id = %id,
            strategy = self.config.strategy.as_str(),
            levels = graph.levels().len(),
            "Plan approved"
        );
        Ok(graph)
    }

    /// Run the session until it completes, pauses or fails.
    ///
    /// Returns the final snapshot. Agent failures never surface here; they
    /// show up in the session's agent states and completeness.
    pub async fn execute(&self, id: SessionId) -> Result<ResearchSession, OrchestratorError> {
        let session = self.sessions.snapshot(id).await?;
        let phase = session.phase();
        if !matches!(
            phase,
            SessionPhase::ExecutingResearch
                | SessionPhase::ResolvingConflicts
                | SessionPhase::GeneratingReport
        ) {
            return Err(OrchestratorError::NotExecutable { id, phase });
        }
        if session.status().is_finished() {
            return Err(OrchestratorError::NotResumable {
                id,
                status: session.status(),
            });
        }

        let cancel = self.register_run(id)?;
        let _guard = RunGuard {
            running: &self.running,
            id,
        };
        if session.status() == SessionStatus::Paused {
            self.sessions
                .update(id, SessionUpdate::Status(SessionStatus::Active))
                .await?;
        }

        let outcome = if phase == SessionPhase::GeneratingReport {
            Ok(PlanOutcome::Completed)
        } else {
            let mut detector = ConflictDetector::with_history(
                self.config.conflicts.clone(),
                session.findings(),
                session.conflicts(),
            );
            self.executor.execute_plan(id, &mut detector, &cancel).await
        };

        match outcome {
            Ok(PlanOutcome::Completed) => self.finish(id).await,
            Ok(PlanOutcome::Paused) => {
                self.sessions.checkpoint(id).await?;
                info!(session_id = %id, "Session paused");
                Ok(self.sessions.snapshot(id).await?)
            }
            Ok(PlanOutcome::Aborted(reason)) => self.fail(id, reason).await,
            Err(e) => {
                self.fail(id, e.to_string()).await?;
                Err(e.into())
            }
        }
    }

    /// Reload a session from its latest checkpoint.
    ///
    /// Agents that were mid-flight when the checkpoint was taken run again on
    /// the next [`execute`](Self::execute).
    pub async fn resume(&self, id: SessionId) -> Result<ResearchSession, OrchestratorError> {
        if self.is_running(id) {
            return Err(OrchestratorError::AlreadyRunning(id));
        }
        let checkpoint = self
            .store
            .latest(&id)
            .await?
            .ok_or(SessionError::NotFound(id))?;
        let status = checkpoint.session.status();
        if status.is_finished() {
            return Err(OrchestratorError::NotResumable { id, status });
        }

        info!(session_id = %id, checkpoint = %checkpoint.key, "Resuming session");
        Ok(self.sessions.restore(checkpoint).await?)
    }

    /// Request a pause.
    ///
    /// With a level in flight the pause waits for its barrier; otherwise it
    /// applies at once and is checkpointed. Once every level has run there
    /// is nothing left to pause and the request fails with
    /// [`SessionError::NothingToPause`].
    pub async fn pause(&self, id: SessionId) -> Result<(), OrchestratorError> {
        self.sessions.update(id, SessionUpdate::RequestPause).await?;
        if self.sessions.snapshot(id).await?.status() == SessionStatus::Paused {
            self.sessions.checkpoint(id).await?;
            info!(session_id = %id, "Session paused");
        } else {
            info!(session_id = %id, "Pause requested");
        }
        Ok(())
    }

    /// Stop a session for good.
    ///
    /// An executing session fails once its in-flight agents observe the
    /// cancellation; an idle one fails immediately.
    pub async fn cancel(&self, id: SessionId) -> Result<(), OrchestratorError> {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        match token {
            Some(token) => {
                info!(session_id = %id, "Cancelling session");
                token.cancel();
            }
            None => {
                self.fail(id, "cancelled".to_string()).await?;
            }
        }
        Ok(())
    }

    /// Read-only snapshot, from memory or else the latest checkpoint.
    pub async fn get_status(&self, id: SessionId) -> Result<ResearchSession, OrchestratorError> {
        match self.sessions.snapshot(id).await {
            Ok(session) => Ok(session),
            Err(SessionError::NotFound(_)) => {
                let checkpoint = self
                    .store
                    .latest(&id)
                    .await?
                    .ok_or(SessionError::NotFound(id))?;
                Ok(checkpoint.session)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every persisted session, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, OrchestratorError> {
        let mut summaries = Vec::new();
        for id in self.store.sessions().await? {
            match self.get_status(id).await {
                Ok(session) => summaries.push(SessionSummary::from(&session)),
                Err(e) => warn!(session_id = %id, error = %e, "Skipping unreadable session"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Move a Completed or Failed session to Archived.
    pub async fn archive(&self, id: SessionId) -> Result<ResearchSession, OrchestratorError> {
        if let Err(SessionError::NotFound(_)) = self.sessions.snapshot(id).await {
            let checkpoint = self
                .store
                .latest(&id)
                .await?
                .ok_or(SessionError::NotFound(id))?;
            self.sessions.restore(checkpoint).await?;
        }
        self.sessions
            .update(id, SessionUpdate::Status(SessionStatus::Archived))
            .await?;
        self.sessions.checkpoint(id).await?;
        info!(session_id = %id, "Session archived");
        Ok(self.sessions.snapshot(id).await?)
    }

    async fn finish(&self, id: SessionId) -> Result<ResearchSession, OrchestratorError> {
        let session = self.sessions.snapshot(id).await?;
        if session.phase() == SessionPhase::ExecutingResearch {
            self.sessions
                .update(id, SessionUpdate::Phase(SessionPhase::ResolvingConflicts))
                .await?;
        }
        if session.phase() != SessionPhase::GeneratingReport {
            self.sessions
                .update(id, SessionUpdate::Phase(SessionPhase::GeneratingReport))
                .await?;
        }

        let session = self.sessions.snapshot(id).await?;
        match self.reports.generate(&session).await {
            Ok(Some(location)) => info!(session_id = %id, %location, "Report written"),
            Ok(None) => {}
            Err(e) => warn!(session_id = %id, error = %e, "Report generation failed"),
        }

        self.sessions
            .update(id, SessionUpdate::Phase(SessionPhase::Completed))
            .await?;
        self.sessions
            .update(id, SessionUpdate::Status(SessionStatus::Completed))
            .await?;
        self.sessions.checkpoint(id).await?;

        let session = self.sessions.snapshot(id).await?;
        let completeness = session.completeness();
        info!(
            session_id = %id,
            findings = session.findings().len(),
            conflicts = session.conflicts().len(),
            completed = ?completeness.completed,
            failed = ?completeness.failed,
            skipped = ?completeness.skipped,
            "Session completed"
        );
        Ok(session)
    }

    async fn fail(&self, id: SessionId, reason: String) -> Result<ResearchSession, OrchestratorError> {
        let session = self.sessions.snapshot(id).await?;
        if session.status().is_finished() {
            return Ok(session);
        }
        self.sessions.update(id, SessionUpdate::Fail(reason)).await?;
        if let Err(e) = self.sessions.checkpoint(id).await {
            warn!(session_id = %id, error = %e, "Final checkpoint failed");
        }
        Ok(self.sessions.snapshot(id).await?)
    }

    fn is_running(&self, id: SessionId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn register_run(&self, id: SessionId) -> Result<CancellationToken, OrchestratorError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.contains_key(&id) {
            return Err(OrchestratorError::AlreadyRunning(id));
        }
        let token = CancellationToken::new();
        running.insert(id, token.clone());
        Ok(token)
    }
}

/// Removes a session from the running set when execution ends.
struct RunGuard<'a> {
    running: &'a Mutex<HashMap<SessionId, CancellationToken>>,
    id: SessionId,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionPolicy;
    use crate::ports::checkpoint_store::InMemoryCheckpointStore;
    use crate::ports::planner::StaticPlanner;
    use crate::ports::report_generator::ReportError;
    use crate::testing::{Collector, Scripted, finding};
    use async_trait::async_trait;
    use diligence_domain::{AgentStatus, AgentTaskError, ConflictHandling, OptimizationStrategy};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CapturingReport(Mutex<Vec<SessionId>>);

    #[async_trait]
    impl ReportGenerator for CapturingReport {
        async fn generate(&self, session: &ResearchSession) -> Result<Option<String>, ReportError> {
            self.0.lock().unwrap().push(session.id());
            Ok(Some(format!("reports/{}.json", session.id())))
        }
    }

    /// Holds report generation until released.
    #[derive(Default)]
    struct BlockingReport {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ReportGenerator for BlockingReport {
        async fn generate(&self, _session: &ResearchSession) -> Result<Option<String>, ReportError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(None)
        }
    }

    struct BrokenReport;

    #[async_trait]
    impl ReportGenerator for BrokenReport {
        async fn generate(&self, _session: &ResearchSession) -> Result<Option<String>, ReportError> {
            Err(ReportError::Render("template missing".into()))
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::with_handling(ConflictHandling::AutoLabel)
    }

    fn orchestrator(registry: AgentRegistry, store: Arc<InMemoryCheckpointStore>) -> ResearchOrchestrator {
        ResearchOrchestrator::new(config(), Arc::new(registry), store)
    }

    fn plan() -> Vec<AgentRequirement> {
        vec![
            AgentRequirement::new("A"),
            AgentRequirement::new("B"),
            AgentRequirement::new("C")
                .with_prerequisite("A")
                .with_prerequisite("B"),
        ]
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new()
            .register_instance("A", Arc::new(Scripted::ok(vec![finding("Acme", "revenue", "$10M", 0.9)])))
            .register_instance("B", Arc::new(Scripted::ok(vec![finding("Acme", "ceo", "Jane Roe", 0.8)])))
            .register_instance("C", Arc::new(Scripted::ok(vec![finding("Acme", "risk", "low", 0.7)])))
    }

    #[tokio::test]
    async fn test_invalid_plan_has_no_side_effects() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orch = orchestrator(registry(), store.clone());
        let cyclic = vec![
            AgentRequirement::new("A").with_prerequisite("B"),
            AgentRequirement::new("B").with_prerequisite("A"),
        ];

        let err = orch.start_session("Acme Corp", cyclic).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Planning(PlanningError::CyclicDependency { .. })));
        assert!(store.is_empty());
        assert!(orch.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_run_completes_and_reports() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let report = Arc::new(CapturingReport::default());
        let orch = orchestrator(registry(), store.clone()).with_report_generator(report.clone());
        let events = Arc::new(Collector::default());
        orch.subscribe_all(events.clone());

        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        assert_eq!(
            orch.get_status(id).await.unwrap().phase(),
            SessionPhase::AwaitingApproval
        );

        let graph = orch.approve_plan(id, None).await.unwrap();
        assert_eq!(graph.levels().len(), 2);

        let session = orch.execute(id).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.findings().len(), 3);
        assert_eq!(session.overall_progress(), 1.0);
        assert_eq!(report.0.lock().unwrap().as_slice(), &[id]);

        let latest = store.latest(&id).await.unwrap().unwrap();
        assert!(latest.is_final);
        assert_eq!(latest.session, session);

        let types = events.types();
        assert_eq!(types.first(), Some(&"session_created"));
        assert!(types.contains(&"plan_approved"));
    }

    #[tokio::test]
    async fn test_plan_and_start_uses_planner() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orch = orchestrator(registry(), store.clone());
        assert!(matches!(
            orch.plan_and_start("Acme Corp").await,
            Err(OrchestratorError::NoPlanner)
        ));

        let orch = orch.with_planner(Arc::new(StaticPlanner::new(plan())));
        let id = orch.plan_and_start("Acme Corp").await.unwrap();
        assert_eq!(orch.get_status(id).await.unwrap().plan().len(), 3);
    }

    #[tokio::test]
    async fn test_approve_with_modifications_replaces_plan() {
        let orch = orchestrator(registry(), Arc::new(InMemoryCheckpointStore::new()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();

        let graph = orch
            .approve_plan(id, Some(vec![AgentRequirement::new("A"), AgentRequirement::new("B")]))
            .await
            .unwrap();
        assert_eq!(graph.levels().len(), 1);

        let session = orch.execute(id).await.unwrap();
        assert!(session.agent_state("C").is_none());
        assert_eq!(session.findings().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_modification_keeps_awaiting_approval() {
        let orch = orchestrator(registry(), Arc::new(InMemoryCheckpointStore::new()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();

        let err = orch
            .approve_plan(id, Some(vec![AgentRequirement::new("A").with_prerequisite("Z")]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Planning(PlanningError::UnknownDependency { .. })));
        let session = orch.get_status(id).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::AwaitingApproval);
        assert_eq!(session.plan().len(), 3);
    }

    #[tokio::test]
    async fn test_execute_requires_approval() {
        let orch = orchestrator(registry(), Arc::new(InMemoryCheckpointStore::new()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        let err = orch.execute(id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NotExecutable {
                phase: SessionPhase::AwaitingApproval,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_pause_then_resume_finishes_remaining_levels() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let gate = Arc::new(Notify::new());
        let c = Arc::new(Scripted::new());
        let registry = AgentRegistry::new()
            .register_instance("A", Arc::new(Scripted::new().with_gate(gate.clone())))
            .register_instance("B", Arc::new(Scripted::new()))
            .register_instance("C", c.clone());
        let orch = Arc::new(orchestrator(registry, store.clone()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();

        let runner = Arc::clone(&orch);
        let run = tokio::spawn(async move { runner.execute(id).await });
        for _ in 0..1000 {
            let session = orch.get_status(id).await.unwrap();
            if session.agent_state("A").is_some_and(|s| s.status == AgentStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        orch.pause(id).await.unwrap();
        assert_eq!(orch.get_status(id).await.unwrap().status(), SessionStatus::Active);
        gate.notify_one();

        let paused = run.await.unwrap().unwrap();
        assert_eq!(paused.status(), SessionStatus::Paused);
        assert_eq!(paused.agent_state("C").unwrap().status, AgentStatus::Pending);
        assert_eq!(c.calls(), 0);

        let resumed = orch.resume(id).await.unwrap();
        assert_eq!(resumed.status(), SessionStatus::Active);
        let done = orch.execute(id).await.unwrap();
        assert_eq!(done.status(), SessionStatus::Completed);
        assert_eq!(c.calls(), 1);
    }

    #[tokio::test]
    async fn test_pause_while_reporting_is_refused() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let report = Arc::new(BlockingReport::default());
        let orch = Arc::new(orchestrator(registry(), store.clone()).with_report_generator(report.clone()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();

        let runner = Arc::clone(&orch);
        let run = tokio::spawn(async move { runner.execute(id).await });
        report.entered.notified().await;

        let err = orch.pause(id).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Session(SessionError::NothingToPause {
                phase: SessionPhase::GeneratingReport,
                ..
            })
        ));
        report.release.notify_one();

        let session = run.await.unwrap().unwrap();
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert_eq!(session.status(), SessionStatus::Completed);
        let latest = store.latest(&id).await.unwrap().unwrap();
        assert!(latest.is_final);
        assert_eq!(latest.session.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_idle_pause_is_persisted() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orch = orchestrator(registry(), store.clone());
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();

        orch.pause(id).await.unwrap();
        assert_eq!(orch.get_status(id).await.unwrap().status(), SessionStatus::Paused);
        let latest = store.latest(&id).await.unwrap().unwrap();
        assert_eq!(latest.session.status(), SessionStatus::Paused);

        // Another process sees the pause and can pick the session up.
        let other = orchestrator(registry(), store.clone());
        assert_eq!(other.get_status(id).await.unwrap().status(), SessionStatus::Paused);
        other.resume(id).await.unwrap();
        let done = other.execute(id).await.unwrap();
        assert_eq!(done.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_outcome_is_persisted() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let gate = Arc::new(Notify::new());
        let registry = AgentRegistry::new()
            .register_instance("A", Arc::new(Scripted::new().with_gate(gate.clone())))
            .register_instance("B", Arc::new(Scripted::new()))
            .register_instance("C", Arc::new(Scripted::new()));
        let orch = Arc::new(orchestrator(registry, store.clone()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();

        let runner = Arc::clone(&orch);
        let run = tokio::spawn(async move { runner.execute(id).await });
        for _ in 0..1000 {
            let session = orch.get_status(id).await.unwrap();
            if session.agent_state("A").is_some_and(|s| s.status == AgentStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        orch.pause(id).await.unwrap();
        gate.notify_one();

        let paused = run.await.unwrap().unwrap();
        assert_eq!(paused.status(), SessionStatus::Paused);
        let latest = store.latest(&id).await.unwrap().unwrap();
        assert_eq!(latest.session, paused);
    }

    #[tokio::test]
    async fn test_resume_in_new_process_skips_settled_agents() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let id = {
            let gate = Arc::new(Notify::new());
            let registry = AgentRegistry::new()
                .register_instance("A", Arc::new(Scripted::new().with_gate(gate.clone())))
                .register_instance("B", Arc::new(Scripted::new()))
                .register_instance("C", Arc::new(Scripted::new()));
            let orch = Arc::new(orchestrator(registry, store.clone()));
            let id = orch.start_session("Acme Corp", plan()).await.unwrap();
            orch.approve_plan(id, None).await.unwrap();
            let runner = Arc::clone(&orch);
            let run = tokio::spawn(async move { runner.execute(id).await });
            for _ in 0..1000 {
                if orch
                    .get_status(id)
                    .await
                    .unwrap()
                    .agent_state("A")
                    .is_some_and(|s| s.status == AgentStatus::Running)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            orch.pause(id).await.unwrap();
            gate.notify_one();
            run.await.unwrap().unwrap();
            id
        };

        let a = Arc::new(Scripted::new());
        let c = Arc::new(Scripted::new());
        let registry = AgentRegistry::new()
            .register_instance("A", a.clone())
            .register_instance("B", Arc::new(Scripted::new()))
            .register_instance("C", c.clone());
        let orch = orchestrator(registry, store);

        orch.resume(id).await.unwrap();
        let session = orch.execute(id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(a.calls(), 0);
        assert_eq!(c.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_fails_running_session() {
        let gate = Arc::new(Notify::new());
        let registry = AgentRegistry::new()
            .register_instance("A", Arc::new(Scripted::new().with_gate(gate)))
            .register_instance("B", Arc::new(Scripted::new()))
            .register_instance("C", Arc::new(Scripted::new()));
        let orch = Arc::new(orchestrator(registry, Arc::new(InMemoryCheckpointStore::new())));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();

        let runner = Arc::clone(&orch);
        let run = tokio::spawn(async move { runner.execute(id).await });
        for _ in 0..1000 {
            if orch
                .get_status(id)
                .await
                .unwrap()
                .agent_state("A")
                .is_some_and(|s| s.status == AgentStatus::Running)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        orch.cancel(id).await.unwrap();

        let session = run.await.unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Failed);
        assert_eq!(session.failure_reason(), Some("cancelled"));
        assert_eq!(session.agent_state("C").unwrap().status, AgentStatus::Pending);

        assert!(matches!(
            orch.resume(id).await,
            Err(OrchestratorError::NotResumable {
                status: SessionStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_report_failure_does_not_fail_session() {
        let orch = orchestrator(registry(), Arc::new(InMemoryCheckpointStore::new()))
            .with_report_generator(Arc::new(BrokenReport));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();
        let session = orch.execute(id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_partial_results_are_disclosed() {
        let registry = AgentRegistry::new()
            .register_instance(
                "A",
                Arc::new(Scripted::err(AgentTaskError::Permanent("blocked".into()))),
            )
            .register_instance("B", Arc::new(Scripted::new()))
            .register_instance("C", Arc::new(Scripted::new()));
        let orch = orchestrator(registry, Arc::new(InMemoryCheckpointStore::new()));
        let id = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(id, None).await.unwrap();

        let session = orch.execute(id).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        let completeness = session.completeness();
        assert_eq!(completeness.completed, vec!["B".to_string()]);
        assert_eq!(completeness.failed, vec!["A".to_string()]);
        assert_eq!(completeness.skipped, vec!["C".to_string()]);
    }

    #[tokio::test]
    async fn test_list_and_archive() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let orch = orchestrator(registry(), store.clone());
        let done = orch.start_session("Acme Corp", plan()).await.unwrap();
        orch.approve_plan(done, None).await.unwrap();
        orch.execute(done).await.unwrap();
        let waiting = orch.start_session("Globex", plan()).await.unwrap();

        let summaries = orch.list_sessions().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, waiting);

        assert!(orch.archive(waiting).await.is_err());
        let archived = orch.archive(done).await.unwrap();
        assert_eq!(archived.status(), SessionStatus::Archived);

        // A fresh orchestrator sees the archived state from the store.
        let other = orchestrator(registry(), store);
        assert_eq!(
            other.get_status(done).await.unwrap().status(),
            SessionStatus::Archived
        );
    }

    #[tokio::test]
    async fn test_reliability_strategy_is_applied() {
        let config = config().with_strategy(OptimizationStrategy::Reliability);
        let orch = ResearchOrchestrator::new(
            config,
            Arc::new(registry()),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let id = orch
            .start_session(
                "Acme Corp",
                vec![
                    AgentRequirement::new("A").with_confidence_threshold(0.5),
                    AgentRequirement::new("B").with_confidence_threshold(0.9),
                ],
            )
            .await
            .unwrap();
        let graph = orch.approve_plan(id, None).await.unwrap();
        assert_eq!(graph.levels()[0].agents, vec!["B".to_string(), "A".to_string()]);
    }

    #[tokio::test]
    async fn test_execution_policy_comes_from_config() {
        let orch = ResearchOrchestrator::new(
            config().with_execution(ExecutionPolicy::default().with_max_parallel_agents(2)),
            Arc::new(AgentRegistry::new()),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        assert_eq!(orch.config().execution.max_parallel_agents, 2);
    }
}
