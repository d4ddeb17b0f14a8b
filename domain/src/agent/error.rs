//! Agent task errors
//!
//! Agents classify their own failures; the execution manager decides what to
//! do with each class (retry, requeue, fall back, reconfigure or give up).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure returned by one agent attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentTaskError {
    /// Network blips, 5xx responses and similar. Retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Provider throttling. Requeued without spending a retry.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The data source has nothing for this query. Triggers the fallback path.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Bad credentials, missing endpoint, etc. One reconfigure-and-retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Attempt exceeded its time budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl AgentTaskError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn kind(&self) -> AgentErrorKind {
        match self {
            AgentTaskError::Transient(_) => AgentErrorKind::Transient,
            AgentTaskError::RateLimited { .. } => AgentErrorKind::RateLimited,
            AgentTaskError::DataUnavailable(_) => AgentErrorKind::DataUnavailable,
            AgentTaskError::Configuration(_) => AgentErrorKind::Configuration,
            AgentTaskError::Permanent(_) => AgentErrorKind::Permanent,
            AgentTaskError::Timeout(_) => AgentErrorKind::Timeout,
            AgentTaskError::Cancelled => AgentErrorKind::Cancelled,
        }
    }

    /// Whether another attempt (counted against the retry budget) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentTaskError::Transient(_) | AgentTaskError::Timeout(_)
        )
    }

    /// Provider-supplied delay for rate-limited failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AgentTaskError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Serializable classification of why an agent ended up Failed or Skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    Transient,
    RateLimited,
    DataUnavailable,
    Configuration,
    Permanent,
    Timeout,
    Cancelled,
    /// A prerequisite failed or was skipped
    UpstreamFailed,
    /// No implementation registered under the requirement's kind
    NotRegistered,
}

impl AgentErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            AgentErrorKind::Transient => "transient",
            AgentErrorKind::RateLimited => "rate_limited",
            AgentErrorKind::DataUnavailable => "data_unavailable",
            AgentErrorKind::Configuration => "configuration",
            AgentErrorKind::Permanent => "permanent",
            AgentErrorKind::Timeout => "timeout",
            AgentErrorKind::Cancelled => "cancelled",
            AgentErrorKind::UpstreamFailed => "upstream_failed",
            AgentErrorKind::NotRegistered => "not_registered",
        }
    }
}

impl std::fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error details recorded on an [`AgentState`](super::state::AgentState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentErrorInfo {
    pub kind: AgentErrorKind,
    pub message: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

impl AgentErrorInfo {
    pub fn new(kind: AgentErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }

    pub fn from_error(error: &AgentTaskError, attempts: u32) -> Self {
        Self::new(error.kind(), error.to_string(), attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(AgentTaskError::transient("503").is_retryable());
        assert!(AgentTaskError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!AgentTaskError::permanent("gone").is_retryable());
        assert!(!AgentTaskError::rate_limited("slow down", None).is_retryable());
        assert!(!AgentTaskError::Configuration("no key".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = AgentTaskError::rate_limited("429", Some(Duration::from_secs(3)));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(AgentTaskError::transient("x").retry_after(), None);
    }

    #[test]
    fn test_error_info_from_error() {
        let info = AgentErrorInfo::from_error(&AgentTaskError::permanent("registry offline"), 2);
        assert_eq!(info.kind, AgentErrorKind::Permanent);
        assert_eq!(info.message, "permanent failure: registry offline");
        assert_eq!(info.attempts, 2);
    }
}
