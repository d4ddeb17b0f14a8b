//! Event types

use crate::agent::state::AgentState;
use crate::session::entities::SessionId;
use crate::session::phase::{SessionPhase, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bus topic an event is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Per-agent status and progress
    AgentState,
    /// Session creation, phase and status changes
    SessionLifecycle,
    /// Level scheduling and barriers
    Execution,
    /// Findings and conflicts
    Findings,
    /// Checkpoint writes
    Persistence,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::AgentState,
        Topic::SessionLifecycle,
        Topic::Execution,
        Topic::Findings,
        Topic::Persistence,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Topic::AgentState => "agent_state",
            Topic::SessionLifecycle => "session_lifecycle",
            Topic::Execution => "execution",
            Topic::Findings => "findings",
            Topic::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated {
        query: String,
    },
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// A pause was queued and will apply at the next level barrier
    PauseRequested,
    PlanApproved {
        levels: usize,
        agents: usize,
    },
    AgentStateChanged {
        agent: String,
        state: AgentState,
        overall_progress: f64,
    },
    LevelStarted {
        level: usize,
        agents: Vec<String>,
    },
    LevelCompleted {
        level: usize,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
    FindingsMerged {
        added: usize,
        total: usize,
    },
    ConflictsDetected {
        added: usize,
        total: usize,
    },
    CheckpointWritten {
        key: String,
        is_final: bool,
    },
    CheckpointFailed {
        attempt: u32,
        error: String,
    },
}

impl EventKind {
    pub fn topic(&self) -> Topic {
        match self {
            EventKind::AgentStateChanged { .. } => Topic::AgentState,
            EventKind::SessionCreated { .. }
            | EventKind::PhaseChanged { .. }
            | EventKind::StatusChanged { .. }
            | EventKind::PauseRequested
            | EventKind::PlanApproved { .. } => Topic::SessionLifecycle,
            EventKind::LevelStarted { .. } | EventKind::LevelCompleted { .. } => Topic::Execution,
            EventKind::FindingsMerged { .. } | EventKind::ConflictsDetected { .. } => {
                Topic::Findings
            }
            EventKind::CheckpointWritten { .. } | EventKind::CheckpointFailed { .. } => {
                Topic::Persistence
            }
        }
    }

    /// Stable snake_case name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::SessionCreated { .. } => "session_created",
            EventKind::PhaseChanged { .. } => "phase_changed",
            EventKind::StatusChanged { .. } => "status_changed",
            EventKind::PauseRequested => "pause_requested",
            EventKind::PlanApproved { .. } => "plan_approved",
            EventKind::AgentStateChanged { .. } => "agent_state_changed",
            EventKind::LevelStarted { .. } => "level_started",
            EventKind::LevelCompleted { .. } => "level_completed",
            EventKind::FindingsMerged { .. } => "findings_merged",
            EventKind::ConflictsDetected { .. } => "conflicts_detected",
            EventKind::CheckpointWritten { .. } => "checkpoint_written",
            EventKind::CheckpointFailed { .. } => "checkpoint_failed",
        }
    }
}

/// An event stamped with its session and per-session sequence number.
///
/// Subscribers deduplicate on `(session_id, sequence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl SessionEvent {
    pub fn new(session_id: SessionId, sequence: u64, kind: EventKind) -> Self {
        Self {
            session_id,
            sequence,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn topic(&self) -> Topic {
        self.kind.topic()
    }
}
