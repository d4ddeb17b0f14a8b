//! Presentation layer for diligence
//!
//! This crate contains the CLI definition, the console formatter and the
//! progress reporters that subscribe to session events.

pub mod cli;
pub mod output;
pub mod progress;

// Re-export commonly used types
pub use cli::commands::{Cli, Command, ConflictHandlingArg, OutputFormat, StrategyArg};
pub use output::console::ConsoleFormatter;
pub use progress::reporter::{ProgressReporter, SimpleProgress};
