//! Scripted demo agents
//!
//! Replays the findings a plan file declares after a simulated delay,
//! optionally failing the first attempts with a chosen error class. Useful
//! for demos and for exercising retry, fallback and cancellation paths
//! without real data sources.

use crate::plan::{AgentScript, PlanFile};
use async_trait::async_trait;
use diligence_application::{Agent, AgentContext, AgentRegistry};
use diligence_domain::{AgentRequirement, AgentTaskError, Finding, SourceCitation};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

pub struct ScriptedAgent {
    script: AgentScript,
    failures_left: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(script: AgentScript) -> Self {
        let failures = if script.fail_with.is_some() {
            script.fail_times
        } else {
            0
        };
        Self {
            script,
            failures_left: AtomicU32::new(failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(
        &self,
        ctx: &AgentContext,
        requirement: &AgentRequirement,
        upstream: &[Finding],
    ) -> Result<Vec<Finding>, AgentTaskError> {
        ctx.check_cancelled()?;
        debug!(
            agent = %requirement.agent_name,
            attempt = ctx.attempt,
            upstream = upstream.len(),
            "Scripted agent running"
        );
        ctx.progress.report(0.1, Some("querying sources"));

        let delay = Duration::from_millis(self.script.delay_ms);
        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(AgentTaskError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        if let Some(failure) = self.script.fail_with
            && self.take_failure()
        {
            let retry_after = self.script.retry_after_secs.map(Duration::from_secs);
            return Err(failure.to_error(&requirement.agent_name, retry_after));
        }

        ctx.progress.report(0.9, Some("compiling findings"));
        let findings = self
            .script
            .findings
            .iter()
            .map(|f| {
                let mut source = SourceCitation::new(f.source.clone().unwrap_or_default());
                if let Some(reliability) = f.reliability {
                    source = source.with_reliability(reliability);
                }
                Finding::new(
                    &requirement.agent_name,
                    &f.entity,
                    &f.aspect,
                    &f.content,
                    f.confidence,
                )
                .with_source(source)
            })
            .collect();
        Ok(findings)
    }

    /// Pretend the configuration was repaired: pending failures are dropped.
    async fn reconfigure(&self) -> Result<(), AgentTaskError> {
        self.failures_left.store(0, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry with a scripted implementation for every registry key of `plan`.
///
/// Requirements sharing a key each get a fresh agent running their own script.
pub fn scripted_registry(plan: &PlanFile) -> AgentRegistry {
    let scripts: Arc<HashMap<String, AgentScript>> = Arc::new(
        plan.agents
            .iter()
            .map(|a| (a.name.clone(), a.script.clone().unwrap_or_default()))
            .collect(),
    );

    let mut registry = AgentRegistry::new();
    let mut keys: Vec<&str> = plan.agents.iter().map(|a| a.registry_key()).collect();
    keys.sort_unstable();
    keys.dedup();
    for key in keys {
        let scripts = Arc::clone(&scripts);
        registry = registry.register(key, move |requirement: &AgentRequirement| {
            let script = scripts
                .get(&requirement.agent_name)
                .cloned()
                .unwrap_or_default();
            Arc::new(ScriptedAgent::new(script)) as Arc<dyn Agent>
        });
    }

    for (key, script) in &plan.fallbacks {
        let script = script.clone();
        registry = registry.register(key.as_str(), move |_: &AgentRequirement| {
            Arc::new(ScriptedAgent::new(script.clone())) as Arc<dyn Agent>
        });
    }
    registry
}
