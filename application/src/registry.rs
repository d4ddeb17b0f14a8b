//! Agent registry
//!
//! Maps stable string keys to factories producing [`Agent`] implementations.
//! Registration happens once at startup; the execution manager resolves each
//! requirement's [`registry_key`](diligence_domain::AgentRequirement::registry_key)
//! against it.
//!
//! ```ignore
//! let registry = AgentRegistry::new()
//!     .register_instance("company_registry", Arc::new(RegistryAgent::new(client)))
//!     .register("news", |req| Arc::new(NewsAgent::for_domains(&req.domains)));
//!
//! let agent = registry.create(&requirement).expect("registered");
//! ```

use crate::ports::agent_runtime::Agent;
use diligence_domain::AgentRequirement;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an agent for one requirement
pub type AgentFactory = Arc<dyn Fn(&AgentRequirement) -> Arc<dyn Agent> + Send + Sync>;

#[derive(Default, Clone)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`, replacing any previous one.
    pub fn register<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&AgentRequirement) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    /// Register one shared instance under `key`.
    pub fn register_instance(self, key: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.register(key, move |_| Arc::clone(&agent))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Agent for `requirement`, looked up by its registry key.
    pub fn create(&self, requirement: &AgentRequirement) -> Option<Arc<dyn Agent>> {
        self.create_with_key(requirement.registry_key(), requirement)
    }

    /// Agent registered under `key`, built for `requirement`.
    pub fn create_with_key(
        &self,
        key: &str,
        requirement: &AgentRequirement,
    ) -> Option<Arc<dyn Agent>> {
        self.factories.get(key).map(|factory| factory(requirement))
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::agent_runtime::AgentContext;
    use async_trait::async_trait;
    use diligence_domain::{AgentTaskError, Finding};

    struct Echo(&'static str);

    #[async_trait]
    impl Agent for Echo {
        async fn execute(
            &self,
            _ctx: &AgentContext,
            requirement: &AgentRequirement,
            _upstream: &[Finding],
        ) -> Result<Vec<Finding>, AgentTaskError> {
            Ok(vec![Finding::new(
                &requirement.agent_name,
                "Acme",
                "source",
                self.0,
                1.0,
            )])
        }
    }

    #[tokio::test]
    async fn test_lookup_by_kind_then_name() {
        let registry = AgentRegistry::new()
            .register_instance("search", Arc::new(Echo("search")))
            .register("legal", |_| Arc::new(Echo("legal")) as Arc<dyn Agent>);

        let by_kind = AgentRequirement::new("news").with_kind("search");
        let by_name = AgentRequirement::new("legal");
        let missing = AgentRequirement::new("unknown");

        let ctx = AgentContext::detached("news", "Acme");
        let findings = registry
            .create(&by_kind)
            .unwrap()
            .execute(&ctx, &by_kind, &[])
            .await
            .unwrap();
        assert_eq!(findings[0].content, "search");
        assert!(registry.create(&by_name).is_some());
        assert!(registry.create(&missing).is_none());
        assert_eq!(registry.keys(), vec!["legal", "search"]);
    }
}
