//! Findings: atomic, cited claims produced by agents

pub mod entities;
pub mod value;
