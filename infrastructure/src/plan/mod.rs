//! Plan files: a query plus the agents that research it.
//!
//! ```toml
//! query = "Acme Corp acquisition screen"
//!
//! [[agents]]
//! name = "registry"
//! domains = ["legal"]
//! confidence_threshold = 0.6
//! estimated_duration_secs = 30
//!
//! [agents.script]
//! delay_ms = 200
//!
//! [[agents.script.findings]]
//! entity = "Acme Corp"
//! aspect = "registration_date"
//! content = "2018-03-15"
//! confidence = 0.95
//! ```
//!
//! The `script` tables drive the demo agents in [`crate::agents`].

mod toml_plan;

pub use toml_plan::{
    AgentScript, PlanAgent, PlanError, PlanFile, ScriptedFailure, ScriptedFinding, TomlPlanFile,
};
