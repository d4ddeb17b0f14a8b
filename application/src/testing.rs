//! Test doubles shared by the use case tests.

use crate::ports::agent_runtime::{Agent, AgentContext};
use crate::ports::event_subscriber::EventSubscriber;
use async_trait::async_trait;
use diligence_domain::{AgentRequirement, AgentTaskError, Finding, SessionEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
pub struct Collector(Mutex<Vec<SessionEvent>>);

impl Collector {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.event_type())
            .collect()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.0.lock().unwrap().iter().map(|e| e.sequence).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }
}

impl EventSubscriber for Collector {
    fn on_event(&self, event: &SessionEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// Shared log of `(agent, "start" | "end")` marks.
pub type RunLog = Arc<Mutex<Vec<(String, &'static str)>>>;

/// Agent that replays a queue of outcomes, then succeeds with no findings.
#[derive(Default)]
pub struct Scripted {
    steps: Mutex<VecDeque<Result<Vec<Finding>, AgentTaskError>>>,
    delay: Duration,
    gate: Option<Arc<Notify>>,
    log: Option<RunLog>,
    calls: AtomicU32,
    reconfigures: AtomicU32,
    upstream_seen: Mutex<Vec<usize>>,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(findings: Vec<Finding>) -> Self {
        Self::new().then(Ok(findings))
    }

    pub fn err(error: AgentTaskError) -> Self {
        Self::new().then(Err(error))
    }

    pub fn then(self, step: Result<Vec<Finding>, AgentTaskError>) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block every call until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reconfigures(&self) -> u32 {
        self.reconfigures.load(Ordering::SeqCst)
    }

    pub fn upstream_seen(&self) -> Vec<usize> {
        self.upstream_seen.lock().unwrap().clone()
    }

    fn mark(&self, agent: &str, what: &'static str) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push((agent.to_string(), what));
        }
    }
}

#[async_trait]
impl Agent for Scripted {
    async fn execute(
        &self,
        ctx: &AgentContext,
        requirement: &AgentRequirement,
        upstream: &[Finding],
    ) -> Result<Vec<Finding>, AgentTaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.upstream_seen.lock().unwrap().push(upstream.len());
        self.mark(&requirement.agent_name, "start");
        ctx.progress.report(0.5, Some("working"));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.mark(&requirement.agent_name, "end");
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn reconfigure(&self) -> Result<(), AgentTaskError> {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn finding(entity: &str, aspect: &str, content: &str, confidence: f64) -> Finding {
    Finding::new("test", entity, aspect, content, confidence)
}
