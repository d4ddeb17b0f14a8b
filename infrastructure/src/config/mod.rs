//! Configuration file loading for diligence
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `DILIGENCE_*` environment variables (`__` separates nesting)
//! 2. `--config <path>` specified file
//! 3. Project root: `./diligence.toml` or `./.diligence.toml`
//! 4. XDG config: `$XDG_CONFIG_HOME/diligence/config.toml`
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigValidationError, FileConfig, FileConflictsConfig, FileExecutionConfig,
    FileOutputConfig, FilePersistenceConfig, FilePlanningConfig,
};
pub use loader::{ConfigLoader, ConfigSource};
