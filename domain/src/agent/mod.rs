//! Agent lifecycle: per-agent state machine and task error taxonomy

pub mod error;
pub mod state;
