//! Orchestrator configuration container

use super::{ExecutionPolicy, PersistencePolicy};
use diligence_domain::{ConflictDetectorConfig, ConflictHandling, OptimizationStrategy};

/// Everything the orchestrator needs, built once and passed in.
///
/// There is no `Default`: conflict handling must be chosen explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub execution: ExecutionPolicy,
    pub strategy: OptimizationStrategy,
    pub conflicts: ConflictDetectorConfig,
    pub persistence: PersistencePolicy,
}

impl OrchestratorConfig {
    pub fn new(conflicts: ConflictDetectorConfig) -> Self {
        Self {
            execution: ExecutionPolicy::default(),
            strategy: OptimizationStrategy::default(),
            conflicts,
            persistence: PersistencePolicy::default(),
        }
    }

    /// Defaults with the given conflict handling mode.
    pub fn with_handling(handling: ConflictHandling) -> Self {
        Self::new(ConflictDetectorConfig::new(handling))
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_persistence(mut self, persistence: PersistencePolicy) -> Self {
        self.persistence = persistence;
        self
    }
}
