//! Agent runtime port
//!
//! Research agents are external collaborators: given a requirement and the
//! findings of its upstream agents, they return new findings. The
//! orchestrator owns timeouts, retries and cancellation around each call.

use async_trait::async_trait;
use diligence_domain::{AgentRequirement, AgentTaskError, Finding, SessionId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A research agent implementation.
///
/// Implementations are looked up by registry key and shared across
/// requirements, so they must not keep per-call state in `self`.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(
        &self,
        ctx: &AgentContext,
        requirement: &AgentRequirement,
        upstream: &[Finding],
    ) -> Result<Vec<Finding>, AgentTaskError>;

    /// Called once after an [`AgentTaskError::Configuration`] failure, before
    /// the single retry it earns.
    async fn reconfigure(&self) -> Result<(), AgentTaskError> {
        Ok(())
    }
}

/// Receives progress reports from running agents.
pub trait ProgressSink: Send + Sync {
    fn report(&self, agent: &str, fraction: f64, task: Option<String>);
}

/// Handle an agent uses to report its own progress.
#[derive(Clone)]
pub struct ProgressHandle {
    agent: String,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressHandle {
    pub fn new(agent: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            agent: agent.into(),
            sink: Some(sink),
        }
    }

    /// A handle whose reports go nowhere.
    pub fn detached(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            sink: None,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Report `fraction` (0.0 - 1.0) done, optionally with a task label.
    pub fn report(&self, fraction: f64, task: Option<&str>) {
        if let Some(sink) = &self.sink {
            sink.report(&self.agent, fraction, task.map(str::to_string));
        }
    }
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("agent", &self.agent)
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

/// Per-attempt context handed to [`Agent::execute`].
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: SessionId,
    /// The research query the session investigates
    pub query: Arc<str>,
    /// Fires when the session is cancelled or the attempt times out
    pub cancellation: CancellationToken,
    /// 1-based attempt number
    pub attempt: u32,
    pub progress: ProgressHandle,
}

impl AgentContext {
    /// Context with a detached progress handle, mostly for tests and demos.
    pub fn detached(agent: impl Into<String>, query: impl Into<Arc<str>>) -> Self {
        Self {
            session_id: SessionId::new(),
            query: query.into(),
            cancellation: CancellationToken::new(),
            attempt: 1,
            progress: ProgressHandle::detached(agent),
        }
    }

    /// `Err(Cancelled)` once the attempt has been cancelled.
    pub fn check_cancelled(&self) -> Result<(), AgentTaskError> {
        if self.cancellation.is_cancelled() {
            return Err(AgentTaskError::Cancelled);
        }
        Ok(())
    }
}
