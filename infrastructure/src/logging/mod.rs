//! Logging infrastructure: the JSONL audit trail and a tracing mirror of
//! bus events.
//!
//! Both implement the [`EventSubscriber`](diligence_application::EventSubscriber)
//! port and are registered on the progress tracker at startup.

mod jsonl_event_log;
mod tracing_events;

pub use jsonl_event_log::JsonlEventLog;
pub use tracing_events::TracingEventSubscriber;
