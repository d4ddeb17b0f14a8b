//! Domain layer for diligence
//!
//! Pure types and synchronous algorithms. No async runtime, no I/O.
//!
//! # Core Concepts
//!
//! ## Planning
//!
//! A research plan is a flat list of [`AgentRequirement`]s. The
//! [`DependencyResolver`] turns it into an [`ExecutionGraph`]: a DAG partitioned
//! into [`ExecutionLevel`]s that may each run concurrently.
//!
//! ## Sessions
//!
//! [`ResearchSession`] is the aggregate root. It owns per-agent
//! [`AgentState`]s, accumulated [`Finding`]s and detected [`Conflict`]s, and
//! moves through the [`SessionPhase`] machine. [`Checkpoint`]s are full
//! snapshots of it.
//!
//! ## Conflicts
//!
//! The [`ConflictDetector`] indexes findings by normalized entity and aspect
//! and labels disagreements with a [`ResolutionStrategy`]; it never picks a
//! winner.

pub mod agent;
pub mod conflict;
pub mod core;
pub mod event;
pub mod finding;
pub mod planning;
pub mod session;
pub mod util;

// Re-export commonly used types
pub use agent::{
    error::{AgentErrorInfo, AgentErrorKind, AgentTaskError},
    state::{AgentState, AgentStatus},
};
pub use conflict::{
    detector::{ConflictDetector, ConflictDetectorConfig, detect_conflicts},
    entities::{Conflict, ConflictHandling, ConflictId, ConflictType, ResolutionStrategy},
};
pub use core::error::TransitionError;
pub use event::entities::{EventKind, SessionEvent, Topic};
pub use finding::{
    entities::{Finding, FindingId, SourceCitation},
    value::{ClaimValue, normalize_entity},
};
pub use planning::{
    error::PlanningError,
    graph::{ExecutionGraph, ExecutionLevel, OptimizationStrategy},
    requirement::AgentRequirement,
    resolver::DependencyResolver,
};
pub use session::{
    checkpoint::{Checkpoint, CheckpointKey, InvalidCheckpointKey},
    entities::{Completeness, ResearchSession, SessionId},
    phase::{SessionPhase, SessionStatus},
};
