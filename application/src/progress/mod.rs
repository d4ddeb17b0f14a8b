//! Progress tracker / message bus

pub mod dedup;
pub mod tracker;

pub use dedup::DedupSubscriber;
pub use tracker::{ProgressTracker, SessionEventStream, SubscriptionId};
