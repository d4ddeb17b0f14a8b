//! Port definitions (interfaces to external collaborators)

pub mod agent_runtime;
pub mod checkpoint_store;
pub mod event_subscriber;
pub mod planner;
pub mod report_generator;
