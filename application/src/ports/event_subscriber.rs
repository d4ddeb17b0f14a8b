//! Event subscriber port
//!
//! Handlers registered on the progress tracker. Delivery is at-least-once, so
//! implementations should tolerate seeing the same `(session_id, sequence)`
//! twice (see `DedupSubscriber`).

use diligence_domain::SessionEvent;

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Subscriber that ignores everything
pub struct NoSubscriber;

impl EventSubscriber for NoSubscriber {
    fn on_event(&self, _event: &SessionEvent) {}
}
