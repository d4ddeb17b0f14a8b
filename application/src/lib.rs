//! Application layer for diligence
//!
//! This crate contains the orchestration use cases, port definitions, the
//! progress bus and application configuration. It depends only on the
//! domain layer.

pub mod config;
pub mod ports;
pub mod progress;
pub mod registry;
pub mod use_cases;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{ExecutionPolicy, OrchestratorConfig, PersistencePolicy};
pub use ports::{
    agent_runtime::{Agent, AgentContext, ProgressHandle, ProgressSink},
    checkpoint_store::{CheckpointStore, InMemoryCheckpointStore, StoreError},
    event_subscriber::{EventSubscriber, NoSubscriber},
    planner::{Planner, PlannerError, StaticPlanner},
    report_generator::{NoReport, ReportError, ReportGenerator},
};
pub use progress::{DedupSubscriber, ProgressTracker, SessionEventStream, SubscriptionId};
pub use registry::{AgentFactory, AgentRegistry};
pub use use_cases::execute_plan::{AgentOutcome, ExecutionManager, LevelResult, PlanOutcome};
pub use use_cases::orchestrator::{OrchestratorError, ResearchOrchestrator, SessionSummary};
pub use use_cases::session_manager::{SessionError, SessionManager, SessionUpdate};
