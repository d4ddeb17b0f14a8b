//! Report generator port

use async_trait::async_trait;
use diligence_domain::ResearchSession;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to render report: {0}")]
    Render(String),
}

/// Renders a finished session for humans.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Returns where the report went (path, URL), if anywhere.
    async fn generate(&self, session: &ResearchSession) -> Result<Option<String>, ReportError>;
}

/// Generator that renders nothing
pub struct NoReport;

#[async_trait]
impl ReportGenerator for NoReport {
    async fn generate(&self, _session: &ResearchSession) -> Result<Option<String>, ReportError> {
        Ok(None)
    }
}
