//! JSON report writer
//!
//! One `<session_id>.json` per finished session. Partial results are written
//! as-is; the `completeness` block says which agents did not deliver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diligence_application::{ReportError, ReportGenerator};
use diligence_domain::{
    AgentState, Completeness, Conflict, Finding, ResearchSession, SessionId, SessionPhase,
    SessionStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct Report<'a> {
    session_id: SessionId,
    query: &'a str,
    status: SessionStatus,
    phase: SessionPhase,
    complete: bool,
    completeness: Completeness,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<&'a str>,
    findings: &'a [Finding],
    conflicts: &'a [Conflict],
    agent_states: &'a BTreeMap<String, AgentState>,
    generated_at: DateTime<Utc>,
}

pub struct JsonReportWriter {
    dir: PathBuf,
}

impl JsonReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn report_path(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl ReportGenerator for JsonReportWriter {
    async fn generate(&self, session: &ResearchSession) -> Result<Option<String>, ReportError> {
        let completeness = session.completeness();
        let report = Report {
            session_id: session.id(),
            query: session.query(),
            status: session.status(),
            phase: session.phase(),
            complete: completeness.is_complete(),
            completeness,
            failure_reason: session.failure_reason(),
            findings: session.findings(),
            conflicts: session.conflicts(),
            agent_states: session.agent_states(),
            generated_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&report)
            .map_err(|e| ReportError::Render(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.report_path(session.id());
        tokio::fs::write(&path, json).await?;
        info!(session_id = %session.id(), path = %path.display(), "Report written");
        Ok(Some(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diligence_domain::AgentRequirement;

    #[tokio::test]
    async fn test_writes_report_named_after_session() {
        let dir = tempfile::tempdir().unwrap();
        let writer = JsonReportWriter::new(dir.path().join("reports"));
        let session = ResearchSession::new(
            "Acme Corp due diligence",
            vec![AgentRequirement::new("registry")],
        );

        let location = writer.generate(&session).await.unwrap().unwrap();
        assert_eq!(PathBuf::from(&location), writer.report_path(session.id()));

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&location).unwrap()).unwrap();
        assert_eq!(written["query"], "Acme Corp due diligence");
        assert_eq!(written["session_id"], session.id().to_string());
        assert!(written["findings"].as_array().unwrap().is_empty());
        assert!(written.get("failure_reason").is_none());
    }
}
