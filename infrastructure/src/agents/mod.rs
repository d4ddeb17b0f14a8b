//! Agent implementations available to the binary.

mod scripted;

pub use scripted::{ScriptedAgent, scripted_registry};
