//! Application-level configuration.
//!
//! Explicit structs built once at startup and passed into each component:
//!
//! - [`ExecutionPolicy`] - parallelism, retries, backoff and failure policy
//! - [`PersistencePolicy`] - checkpoint retries and retention
//! - [`OrchestratorConfig`] - container handed to the orchestrator

pub mod execution_policy;
pub mod orchestrator_config;
pub mod persistence_policy;

pub use execution_policy::ExecutionPolicy;
pub use orchestrator_config::OrchestratorConfig;
pub use persistence_policy::PersistencePolicy;
