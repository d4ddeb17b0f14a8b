//! Raw TOML configuration data types
//!
//! These structs mirror the config file exactly. Durations are spelled out
//! in their unit (`_ms`, `_secs`) so the file stays plain TOML.

use diligence_application::{ExecutionPolicy, OrchestratorConfig, PersistencePolicy};
use diligence_domain::{ConflictDetectorConfig, ConflictHandling, OptimizationStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for `execution.backoff_factor`.
pub const MAX_BACKOFF_FACTOR: f64 = 100.0;

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error(
        "conflicts.handling is not set; choose \"auto_label\" or \"review_all\" \
         (or pass --conflict-handling)"
    )]
    MissingConflictHandling,

    #[error("conflicts.handling: {0}")]
    InvalidConflictHandling(String),

    #[error("planning.strategy: {0}")]
    InvalidStrategy(String),

    #[error("execution.max_parallel_agents cannot be 0")]
    ZeroParallelism,

    #[error("execution.backoff_factor must be between 1.0 and 100.0, got {0}")]
    InvalidBackoffFactor(f64),

    #[error("{field} must be between 0.0 and 1.0, got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("persistence.retention cannot be 0")]
    ZeroRetention,
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub execution: FileExecutionConfig,
    pub planning: FilePlanningConfig,
    pub conflicts: FileConflictsConfig,
    pub persistence: FilePersistenceConfig,
    pub output: FileOutputConfig,
}

/// `[execution]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileExecutionConfig {
    pub max_parallel_agents: usize,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    pub backoff_factor: f64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub rate_limit_fallback_delay_secs: u64,
    pub max_rate_limit_requeues: u32,
    pub critical_agents: BTreeSet<String>,
    /// Agent name -> registry key of its fallback implementation
    pub fallback_agents: BTreeMap<String, String>,
}

impl Default for FileExecutionConfig {
    fn default() -> Self {
        let policy = ExecutionPolicy::default();
        Self {
            max_parallel_agents: policy.max_parallel_agents,
            retry_attempts: policy.retry_attempts,
            backoff_factor: policy.backoff_factor,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_secs: policy.max_backoff.as_secs(),
            rate_limit_fallback_delay_secs: policy.rate_limit_fallback_delay.as_secs(),
            max_rate_limit_requeues: policy.max_rate_limit_requeues,
            critical_agents: BTreeSet::new(),
            fallback_agents: BTreeMap::new(),
        }
    }
}

/// `[planning]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePlanningConfig {
    /// "speed", "resource" or "reliability"
    pub strategy: String,
}

impl Default for FilePlanningConfig {
    fn default() -> Self {
        Self {
            strategy: OptimizationStrategy::default().as_str().to_string(),
        }
    }
}

/// `[conflicts]`
///
/// `handling` has no default; without it (or `--conflict-handling`)
/// validation fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConflictsConfig {
    /// "auto_label" or "review_all"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handling: Option<String>,
    pub numeric_tolerance: f64,
    pub date_tolerance_days: i64,
    pub reliability_gap: f64,
}

impl Default for FileConflictsConfig {
    fn default() -> Self {
        let defaults = ConflictDetectorConfig::new(ConflictHandling::AutoLabel);
        Self {
            handling: None,
            numeric_tolerance: defaults.numeric_tolerance,
            date_tolerance_days: defaults.date_tolerance_days,
            reliability_gap: defaults.reliability_gap,
        }
    }
}

/// `[persistence]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePersistenceConfig {
    /// Checkpoint directory; defaults to the platform data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
    pub checkpoint_retries: u32,
    pub checkpoint_retry_delay_ms: u64,
    pub retention: usize,
}

impl Default for FilePersistenceConfig {
    fn default() -> Self {
        let policy = PersistencePolicy::default();
        Self {
            checkpoint_dir: None,
            checkpoint_retries: policy.checkpoint_retries,
            checkpoint_retry_delay_ms: policy.checkpoint_retry_delay.as_millis() as u64,
            retention: policy.retention,
        }
    }
}

impl FilePersistenceConfig {
    /// Configured directory, else `<data dir>/diligence/checkpoints`.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("diligence")
                .join("checkpoints")
        })
    }
}

/// `[output]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOutputConfig {
    /// Where JSON reports are written
    pub report_dir: PathBuf,
    /// JSONL audit log of every session event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,
    /// Diagnostic log file (in addition to stderr)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Show progress bars while executing
    pub show_progress: bool,
    pub color: bool,
}

impl Default for FileOutputConfig {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("reports"),
            event_log: None,
            log_file: None,
            show_progress: true,
            color: true,
        }
    }
}

impl FileConfig {
    /// Validate everything except the conflict handling choice, which may
    /// still come from the command line.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.execution.max_parallel_agents == 0 {
            return Err(ConfigValidationError::ZeroParallelism);
        }
        let factor = self.execution.backoff_factor;
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&factor) {
            return Err(ConfigValidationError::InvalidBackoffFactor(factor));
        }
        for (field, value) in [
            ("conflicts.numeric_tolerance", self.conflicts.numeric_tolerance),
            ("conflicts.reliability_gap", self.conflicts.reliability_gap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::OutOfRange { field, value });
            }
        }
        if self.persistence.retention == 0 {
            return Err(ConfigValidationError::ZeroRetention);
        }
        self.strategy()?;
        if let Some(handling) = &self.conflicts.handling {
            handling
                .parse::<ConflictHandling>()
                .map_err(ConfigValidationError::InvalidConflictHandling)?;
        }
        Ok(())
    }

    pub fn strategy(&self) -> Result<OptimizationStrategy, ConfigValidationError> {
        self.planning
            .strategy
            .parse()
            .map_err(ConfigValidationError::InvalidStrategy)
    }

    /// Build the orchestrator configuration.
    ///
    /// `handling_override` (from `--conflict-handling`) wins over the file;
    /// with neither set this fails with
    /// [`ConfigValidationError::MissingConflictHandling`].
    pub fn to_orchestrator_config(
        &self,
        handling_override: Option<ConflictHandling>,
    ) -> Result<OrchestratorConfig, ConfigValidationError> {
        self.validate()?;

        let handling = match (handling_override, &self.conflicts.handling) {
            (Some(handling), _) => handling,
            (None, Some(raw)) => raw
                .parse()
                .map_err(ConfigValidationError::InvalidConflictHandling)?,
            (None, None) => return Err(ConfigValidationError::MissingConflictHandling),
        };

        let exec = &self.execution;
        let mut execution = ExecutionPolicy::default()
            .with_max_parallel_agents(exec.max_parallel_agents)
            .with_retry_attempts(exec.retry_attempts)
            .with_backoff(
                Duration::from_millis(exec.initial_backoff_ms),
                exec.backoff_factor,
                Duration::from_secs(exec.max_backoff_secs),
            )
            .with_rate_limit_fallback_delay(Duration::from_secs(
                exec.rate_limit_fallback_delay_secs,
            ));
        execution.max_rate_limit_requeues = exec.max_rate_limit_requeues;
        for agent in &exec.critical_agents {
            execution = execution.with_critical_agent(agent);
        }
        for (agent, key) in &exec.fallback_agents {
            execution = execution.with_fallback(agent, key);
        }

        let conflicts = ConflictDetectorConfig::new(handling)
            .with_numeric_tolerance(self.conflicts.numeric_tolerance)
            .with_date_tolerance_days(self.conflicts.date_tolerance_days)
            .with_reliability_gap(self.conflicts.reliability_gap);

        let persistence = PersistencePolicy::default()
            .with_checkpoint_retries(
                self.persistence.checkpoint_retries,
                Duration::from_millis(self.persistence.checkpoint_retry_delay_ms),
            )
            .with_retention(self.persistence.retention);

        Ok(OrchestratorConfig::new(conflicts)
            .with_execution(execution)
            .with_strategy(self.strategy()?)
            .with_persistence(persistence))
    }
}
