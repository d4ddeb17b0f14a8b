//! Session checkpoints
//!
//! A checkpoint is a full, self-contained copy of a [`ResearchSession`].
//! Restoring replaces the live session wholesale; events are never replayed.

use super::entities::{ResearchSession, SessionId};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y%m%dT%H%M%S%.fZ";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid checkpoint key '{0}'")]
pub struct InvalidCheckpointKey(pub String);

/// `(session id, timestamp)` key of a checkpoint.
///
/// Renders as `"{session_id}/{timestamp}"`; the timestamp is fixed-width with
/// microsecond precision, so string order equals chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointKey {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointKey {
    pub fn new(session_id: SessionId, timestamp: DateTime<Utc>) -> Self {
        let micros = timestamp.timestamp_micros();
        Self {
            session_id,
            timestamp: DateTime::from_timestamp_micros(micros).unwrap_or(timestamp),
        }
    }

    /// A key for "now" that sorts strictly after `previous`.
    pub fn next_after(session_id: SessionId, previous: Option<&CheckpointKey>) -> Self {
        let key = Self::new(session_id, Utc::now());
        match previous {
            Some(prev) if prev.timestamp >= key.timestamp => Self {
                session_id,
                timestamp: prev.timestamp + TimeDelta::microseconds(1),
            },
            _ => key,
        }
    }

    /// Prefix shared by every checkpoint key of `session_id`.
    pub fn session_prefix(session_id: &SessionId) -> String {
        format!("{session_id}/")
    }

    pub fn parse(s: &str) -> Result<Self, InvalidCheckpointKey> {
        let invalid = || InvalidCheckpointKey(s.to_string());
        let (session, timestamp) = s.split_once('/').ok_or_else(invalid)?;
        let session_id = session.parse::<SessionId>().map_err(|_| invalid())?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_PARSE_FORMAT)
            .map_err(|_| invalid())?
            .and_utc();
        Ok(Self::new(session_id, timestamp))
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.session_id,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

impl std::str::FromStr for CheckpointKey {
    type Err = InvalidCheckpointKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CheckpointKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CheckpointKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Full snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub key: CheckpointKey,
    /// Taken after the session reached a terminal status; exempt from retention
    pub is_final: bool,
    pub session: ResearchSession,
}

impl Checkpoint {
    pub fn capture(key: CheckpointKey, session: &ResearchSession) -> Self {
        Self {
            key,
            is_final: session.status().is_finished(),
            session: session.clone(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.key.session_id
    }

    pub fn restore(self) -> ResearchSession {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::error::{AgentErrorInfo, AgentErrorKind};
    use crate::conflict::detector::{ConflictDetectorConfig, detect_conflicts};
    use crate::conflict::entities::ConflictHandling;
    use crate::finding::entities::{Finding, SourceCitation};
    use crate::planning::graph::OptimizationStrategy;
    use crate::planning::requirement::AgentRequirement;
    use crate::planning::resolver::DependencyResolver;
    use crate::session::phase::SessionPhase;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_key_round_trip_and_order() {
        let session_id = SessionId::new();
        let first = CheckpointKey::next_after(session_id, None);
        let second = CheckpointKey::next_after(session_id, Some(&first));
        assert!(second > first);
        assert!(second.to_string() > first.to_string());
        assert!(first.to_string().starts_with(&CheckpointKey::session_prefix(&session_id)));

        let parsed: CheckpointKey = first.to_string().parse().unwrap();
        assert_eq!(parsed, first);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(CheckpointKey::parse("nonsense").is_err());
        assert!(CheckpointKey::parse("not-a-uuid/20240101T000000.000000Z").is_err());
        let id = SessionId::new();
        assert!(CheckpointKey::parse(&format!("{id}/yesterday")).is_err());
    }

    /// Drive a session through a random amount of work.
    fn arb_session() -> impl Strategy<Value = ResearchSession> {
        (
            "[A-Za-z ]{1,20}",
            1usize..6,
            proptest::collection::vec((0u8..4, 0.0f64..1.0, "[a-z0-9 ]{1,10}"), 0..12),
            any::<bool>(),
            0u64..50,
        )
            .prop_map(|(query, agents, steps, fail_session, sequence)| {
                let plan: Vec<AgentRequirement> = (0..agents)
                    .map(|i| {
                        let mut req = AgentRequirement::new(format!("agent{i}"))
                            .with_domain("financial")
                            .with_estimated_duration(Duration::from_secs(30 + i as u64));
                        if i > 0 {
                            req = req.with_prerequisite(format!("agent{}", i - 1));
                        }
                        req
                    })
                    .collect();
                let graph = DependencyResolver::default()
                    .resolve(plan.clone(), OptimizationStrategy::Reliability)
                    .unwrap();

                let mut session = ResearchSession::new(query, plan);
                for phase in [
                    SessionPhase::AnalyzingQuery,
                    SessionPhase::GeneratingPlan,
                    SessionPhase::AwaitingApproval,
                    SessionPhase::ExecutingResearch,
                ] {
                    session.transition_phase(phase).unwrap();
                }
                session.install_graph(graph);

                let mut findings = Vec::new();
                for (i, (op, value, content)) in steps.into_iter().enumerate() {
                    let agent = format!("agent{}", i % agents);
                    let _ = match op {
                        0 => session.update_agent(&agent, |s, n| s.start(n, Some(content.clone()))),
                        1 => session.update_agent(&agent, |s, n| s.report_progress(n, value, None)),
                        2 => session.update_agent(&agent, |s, n| s.complete(n)),
                        _ => session.update_agent(&agent, |s, n| {
                            s.fail(n, AgentErrorInfo::new(AgentErrorKind::Transient, &content, 1))
                        }),
                    };
                    findings.push(
                        Finding::new(agent, "Acme", "revenue", content, value)
                            .with_source(SourceCitation::new("registry").with_reliability(value)),
                    );
                }
                let conflicts = detect_conflicts(
                    &ConflictDetectorConfig::new(ConflictHandling::AutoLabel),
                    &findings,
                );
                session.merge_findings(findings);
                session.add_conflicts(conflicts);
                for _ in 0..sequence {
                    session.next_sequence();
                }
                if fail_session {
                    session.fail("store unavailable");
                }
                session
            })
    }

    proptest! {
        #[test]
        fn prop_restore_of_checkpoint_is_deep_equal(session in arb_session()) {
            let key = CheckpointKey::next_after(session.id(), None);
            let checkpoint = Checkpoint::capture(key, &session);

            let bytes = serde_json::to_vec(&checkpoint).unwrap();
            let loaded: Checkpoint = serde_json::from_slice(&bytes).unwrap();

            prop_assert_eq!(loaded.key, key);
            prop_assert_eq!(loaded.restore(), session);
        }
    }
}
