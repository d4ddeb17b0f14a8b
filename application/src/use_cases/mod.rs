//! Use cases
//!
//! - [`session_manager`] - single writer of every session
//! - [`execute_plan`] - level-by-level agent execution
//! - [`orchestrator`] - facade over planning, execution and persistence

pub mod execute_plan;
pub mod orchestrator;
pub mod session_manager;
