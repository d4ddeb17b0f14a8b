//! Console output formatter

use colored::{ColoredString, Colorize};
use diligence_application::SessionSummary;
use diligence_domain::util::truncate_str;
use diligence_domain::{AgentStatus, ExecutionGraph, Finding, ResearchSession, SessionStatus};
use serde::Serialize;
use std::collections::BTreeMap;

const MAX_CONTENT: usize = 160;

/// Formats research sessions for console display
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// Full view of one session: agents, findings, conflicts and gaps.
    pub fn format_session(session: &ResearchSession) -> String {
        let mut output = String::new();

        output.push_str(&Self::header("Research Session"));
        output.push('\n');
        output.push_str(&format!("{} {}\n", "Session:".cyan().bold(), session.id()));
        output.push_str(&format!("{} {}\n", "Query:".cyan().bold(), session.query()));
        output.push_str(&format!(
            "{} {} / {}  ({:.0}%)\n",
            "State:".cyan().bold(),
            session.phase(),
            Self::status_label(session.status()),
            session.overall_progress() * 100.0
        ));
        if let Some(reason) = session.failure_reason() {
            output.push_str(&format!("{} {}\n", "Reason:".red().bold(), reason));
        }

        // Agents, in level order when a graph exists
        output.push_str(&Self::section_header("Agents"));
        let names: Vec<String> = match session.graph() {
            Some(graph) => graph
                .levels()
                .iter()
                .flat_map(|level| level.agents.iter().cloned())
                .collect(),
            None => session.agent_states().keys().cloned().collect(),
        };
        for name in &names {
            let Some(state) = session.agent_state(name) else {
                continue;
            };
            let mut line = format!(
                "  {:<24} {}",
                name,
                Self::agent_status_label(state.status)
            );
            if state.attempts > 1 {
                line.push_str(&format!(" after {} attempts", state.attempts));
            }
            if let Some(error) = &state.error_info {
                line.push_str(&format!(" [{}] {}", error.kind, error.message).dimmed().to_string());
            }
            output.push_str(&line);
            output.push('\n');
        }

        let completeness = session.completeness();
        if !completeness.is_complete() && completeness.total() > 0 {
            output.push_str(&format!(
                "\n{} {}/{} agents delivered",
                "Incomplete:".yellow().bold(),
                completeness.completed.len(),
                completeness.total()
            ));
            for (label, agents) in [
                ("failed", &completeness.failed),
                ("skipped", &completeness.skipped),
                ("outstanding", &completeness.outstanding),
            ] {
                if !agents.is_empty() {
                    output.push_str(&format!("; {label}: {}", agents.join(", ")));
                }
            }
            output.push('\n');
        }

        if !session.findings().is_empty() {
            output.push_str(&Self::section_header("Findings"));
            output.push_str(&Self::format_findings(session.findings()));
        }

        if !session.conflicts().is_empty() {
            output.push_str(&Self::section_header("Conflicts"));
            for conflict in session.conflicts() {
                let marker = if conflict.resolved {
                    "resolved".green()
                } else {
                    "open".yellow()
                };
                output.push_str(&format!(
                    "  {} {} / {}: {} (severity {:.2}, strategy {}) [{}]\n",
                    "!".yellow().bold(),
                    conflict.entity,
                    conflict.aspect,
                    conflict.conflict_type,
                    conflict.severity,
                    conflict.resolution_strategy,
                    marker
                ));
                for id in &conflict.findings {
                    if let Some(finding) = session.findings().iter().find(|f| &f.id == id) {
                        output.push_str(&format!(
                            "      {} {} ({:.2})\n",
                            format!("{}:", finding.agent_id).dimmed(),
                            Self::clip(&finding.content),
                            finding.confidence
                        ));
                    }
                }
            }
        }

        output.push_str(&Self::footer());
        output
    }

    /// One line per session.
    pub fn format_list(sessions: &[SessionSummary]) -> String {
        if sessions.is_empty() {
            return format!("{}\n", "No sessions found.".dimmed());
        }
        let mut output = String::new();
        for summary in sessions {
            output.push_str(&format!(
                "{}  {:<10} {:<20} {:>4.0}%  {}  {}\n",
                summary.id,
                Self::status_label(summary.status),
                summary.phase.to_string(),
                summary.overall_progress * 100.0,
                summary.updated_at.format("%Y-%m-%d %H:%M"),
                summary.query
            ));
        }
        output
    }

    /// Levels of an execution graph, for plan approval.
    pub fn format_graph(graph: &ExecutionGraph) -> String {
        let mut output = format!(
            "{} {} agents in {} levels (strategy: {})\n",
            "Plan:".cyan().bold(),
            graph.len(),
            graph.levels().len(),
            graph.strategy()
        );
        for level in graph.levels() {
            output.push_str(&format!(
                "  {} {}\n",
                format!("Level {}:", level.index + 1).bold(),
                level.agents.join(", ")
            ));
        }
        output
    }

    /// Format as JSON
    pub fn format_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_findings(findings: &[Finding]) -> String {
        let mut by_entity: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in findings {
            by_entity.entry(finding.entity.as_str()).or_default().push(finding);
        }
        let mut output = String::new();
        for (entity, findings) in by_entity {
            output.push_str(&format!("\n{}\n", format!("── {entity} ──").yellow().bold()));
            for finding in findings {
                output.push_str(&format!(
                    "  * {}: {} {}\n",
                    finding.aspect,
                    Self::clip(&finding.content),
                    format!("({:.2}, {})", finding.confidence, finding.agent_id).dimmed()
                ));
            }
        }
        output
    }

    fn clip(content: &str) -> String {
        let clipped = truncate_str(content, MAX_CONTENT);
        if clipped.len() < content.len() {
            format!("{clipped}...")
        } else {
            clipped.to_string()
        }
    }

    pub fn status_label(status: SessionStatus) -> ColoredString {
        match status {
            SessionStatus::Active => status.as_str().cyan(),
            SessionStatus::Paused => status.as_str().yellow(),
            SessionStatus::Completed => status.as_str().green(),
            SessionStatus::Failed => status.as_str().red(),
            SessionStatus::Archived => status.as_str().dimmed(),
        }
    }

    pub fn agent_status_label(status: AgentStatus) -> ColoredString {
        match status {
            AgentStatus::Pending => status.as_str().dimmed(),
            AgentStatus::Running => status.as_str().cyan(),
            AgentStatus::Completed => status.as_str().green(),
            AgentStatus::Failed => status.as_str().red(),
            AgentStatus::Skipped => status.as_str().yellow(),
        }
    }

    fn header(title: &str) -> String {
        let line = "=".repeat(60);
        format!("{}\n{:^60}\n{}", line.cyan(), title.bold(), line.cyan())
    }

    fn section_header(title: &str) -> String {
        format!("\n{}\n{}\n", title.cyan().bold(), "-".repeat(40))
    }

    fn footer() -> String {
        format!("\n{}\n", "=".repeat(60).cyan())
    }
}
