//! Infrastructure layer for diligence
//!
//! Adapters for the ports defined in the application layer: layered
//! configuration, the file checkpoint store, event logs, TOML plan files,
//! scripted demo agents and the JSON report writer.

pub mod agents;
pub mod config;
pub mod logging;
pub mod persistence;
pub mod plan;
pub mod report;

// Re-export commonly used types
pub use agents::{ScriptedAgent, scripted_registry};
pub use config::{ConfigLoader, ConfigSource, ConfigValidationError, FileConfig};
pub use logging::{JsonlEventLog, TracingEventSubscriber};
pub use persistence::FileCheckpointStore;
pub use plan::{PlanError, PlanFile, TomlPlanFile};
pub use report::JsonReportWriter;
