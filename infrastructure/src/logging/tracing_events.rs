//! Mirrors bus events into `tracing` so they show up in diagnostic logs.

use diligence_application::EventSubscriber;
use diligence_domain::{EventKind, SessionEvent};
use tracing::{debug, warn};

pub struct TracingEventSubscriber;

impl EventSubscriber for TracingEventSubscriber {
    fn on_event(&self, event: &SessionEvent) {
        match &event.kind {
            EventKind::CheckpointFailed { attempt, error } => {
                warn!(
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    attempt,
                    %error,
                    "Checkpoint attempt failed"
                );
            }
            EventKind::AgentStateChanged { agent, state, .. } => {
                debug!(
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    agent = %agent,
                    status = %state.status,
                    "Agent state changed"
                );
            }
            kind => {
                debug!(
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    event = kind.event_type(),
                    "Session event"
                );
            }
        }
    }
}
