//! Research session aggregate, its state machines and checkpoints

pub mod checkpoint;
pub mod entities;
pub mod phase;
