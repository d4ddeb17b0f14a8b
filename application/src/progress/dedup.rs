//! Duplicate-dropping subscriber wrapper

use crate::ports::event_subscriber::EventSubscriber;
use diligence_domain::{SessionEvent, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Forwards each `(session_id, sequence)` at most once, in increasing order.
///
/// Sequence numbers are monotonic per session, so anything at or below the
/// highest sequence already delivered is a duplicate.
pub struct DedupSubscriber {
    inner: Arc<dyn EventSubscriber>,
    high_water: Mutex<HashMap<SessionId, u64>>,
}

impl DedupSubscriber {
    pub fn new(inner: Arc<dyn EventSubscriber>) -> Self {
        Self {
            inner,
            high_water: Mutex::new(HashMap::new()),
        }
    }
}

impl EventSubscriber for DedupSubscriber {
    fn on_event(&self, event: &SessionEvent) {
        {
            let mut high_water = self
                .high_water
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let last = high_water.entry(event.session_id).or_insert(0);
            if event.sequence <= *last {
                return;
            }
            *last = event.sequence;
        }
        self.inner.on_event(event);
    }
}
