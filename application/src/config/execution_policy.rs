//! Execution policy: how agent tasks are run, retried and given up on.

use diligence_domain::AgentRequirement;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Agent task execution parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPolicy {
    /// Worker pool size per session; also caps level width under `speed`.
    pub max_parallel_agents: usize,
    /// Retries after the first attempt for transient failures and timeouts.
    pub retry_attempts: u32,
    /// Multiplier for both the attempt timeout and the backoff curve.
    pub backoff_factor: f64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Requeue delay when a rate-limited provider gives no `retry_after`.
    pub rate_limit_fallback_delay: Duration,
    /// Upper bound on rate-limit requeues for one agent.
    pub max_rate_limit_requeues: u32,
    /// Execution aborts once every agent in this set failed or was skipped.
    pub critical_agents: BTreeSet<String>,
    /// Agent name -> registry key tried when the agent reports data unavailable.
    pub fallback_agents: BTreeMap<String, String>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_parallel_agents: 5,
            retry_attempts: 3,
            backoff_factor: 2.0,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            rate_limit_fallback_delay: Duration::from_secs(5),
            max_rate_limit_requeues: 10,
            critical_agents: BTreeSet::new(),
            fallback_agents: BTreeMap::new(),
        }
    }
}

impl ExecutionPolicy {
    // ==================== Builder Methods ====================

    pub fn with_max_parallel_agents(mut self, max: usize) -> Self {
        self.max_parallel_agents = max.max(1);
        self
    }

    pub fn with_retry_attempts(mut self, retries: u32) -> Self {
        self.retry_attempts = retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, factor: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_factor = factor;
        self.max_backoff = max;
        self
    }

    pub fn with_rate_limit_fallback_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_fallback_delay = delay;
        self
    }

    pub fn with_critical_agent(mut self, agent: impl Into<String>) -> Self {
        self.critical_agents.insert(agent.into());
        self
    }

    pub fn with_fallback(mut self, agent: impl Into<String>, registry_key: impl Into<String>) -> Self {
        self.fallback_agents.insert(agent.into(), registry_key.into());
        self
    }

    // ==================== Derived Values ====================

    /// Time budget for one attempt: `estimated_duration × backoff_factor`.
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn attempt_timeout(&self, requirement: &AgentRequirement) -> Duration {
        let secs = requirement.estimated_duration.as_secs_f64() * self.backoff_factor.max(1.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Delay before retry number `retry` (1-based), capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_factor.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Total attempts an agent may make, excluding rate-limit requeues.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let policy = ExecutionPolicy::default();
        assert_eq!(policy.max_parallel_agents, 5);
        assert_eq!(policy.retry_attempts, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.critical_agents.is_empty());
    }

    #[test]
    fn test_attempt_timeout_scales_estimate() {
        let policy = ExecutionPolicy::default();
        let req = AgentRequirement::new("a").with_estimated_duration(Duration::from_secs(10));
        assert_eq!(policy.attempt_timeout(&req), Duration::from_secs(20));
    }

    #[test]
    fn test_attempt_timeout_saturates() {
        let req = AgentRequirement::new("a").with_estimated_duration(Duration::from_secs(u64::MAX / 2));
        let policy = ExecutionPolicy::default().with_backoff(
            Duration::from_millis(100),
            1e300,
            Duration::from_secs(30),
        );
        assert_eq!(policy.attempt_timeout(&req), Duration::MAX);

        let policy = ExecutionPolicy::default().with_backoff(
            Duration::from_millis(100),
            f64::INFINITY,
            Duration::from_secs(30),
        );
        assert_eq!(policy.attempt_timeout(&req), Duration::MAX);
        assert_eq!(policy.backoff_for(3), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_curve() {
        let policy = ExecutionPolicy::default().with_backoff(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(100), Duration::from_millis(500));
    }

    #[test]
    fn test_builder() {
        let policy = ExecutionPolicy::default()
            .with_max_parallel_agents(0)
            .with_critical_agent("registry")
            .with_fallback("news", "archive_search");
        assert_eq!(policy.max_parallel_agents, 1);
        assert!(policy.critical_agents.contains("registry"));
        assert_eq!(
            policy.fallback_agents.get("news").map(String::as_str),
            Some("archive_search")
        );
    }
}
