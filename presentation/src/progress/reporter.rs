//! Progress reporting for research sessions

use colored::Colorize;
use diligence_application::EventSubscriber;
use diligence_domain::{AgentState, AgentStatus, EventKind, SessionEvent, SessionStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const OVERALL_SCALE: u64 = 1000;

/// Live progress bars: one for the session, one spinner per running agent
pub struct ProgressReporter {
    multi: MultiProgress,
    overall: Mutex<Option<ProgressBar>>,
    agents: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    /// Reporter that tracks state without drawing anything.
    pub fn hidden() -> Self {
        Self::with_multi(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            overall: Mutex::new(None),
            agents: Mutex::new(HashMap::new()),
        }
    }

    fn overall_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold.cyan} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("  {spinner:.green} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn overall_bar(&self) -> ProgressBar {
        let mut overall = Self::lock(&self.overall);
        overall
            .get_or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(OVERALL_SCALE));
                pb.set_style(Self::overall_style());
                pb.set_prefix("Research");
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            })
            .clone()
    }

    /// Names of agents with a live spinner.
    pub fn active_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = Self::lock(&self.agents).keys().cloned().collect();
        names.sort();
        names
    }

    /// Current overall position, 0 to 1000.
    pub fn overall_position(&self) -> u64 {
        Self::lock(&self.overall)
            .as_ref()
            .map(ProgressBar::position)
            .unwrap_or(0)
    }

    fn on_agent_state(&self, agent: &str, state: &AgentState, overall_progress: f64) {
        let overall = self.overall_bar();
        overall.set_position((overall_progress.clamp(0.0, 1.0) * OVERALL_SCALE as f64) as u64);

        let mut agents = Self::lock(&self.agents);
        match state.status {
            AgentStatus::Running => {
                let pb = agents.entry(agent.to_string()).or_insert_with(|| {
                    let pb = self.multi.add(ProgressBar::new_spinner());
                    pb.set_style(Self::spinner_style());
                    pb.set_prefix(agent.to_string());
                    pb.enable_steady_tick(Duration::from_millis(120));
                    pb
                });
                let task = state.current_task.as_deref().unwrap_or("running");
                let attempt = if state.attempts > 1 {
                    format!(" (attempt {})", state.attempts)
                } else {
                    String::new()
                };
                pb.set_message(format!(
                    "{task} {:>3.0}%{attempt}",
                    state.progress_fraction * 100.0
                ));
            }
            AgentStatus::Pending => {}
            AgentStatus::Failed if state.awaiting_retry => {
                if let Some(pb) = agents.get(agent) {
                    let kind = state.error_info.as_ref().map_or("error", |e| e.kind.as_str());
                    pb.set_message(format!("retrying after {kind}"));
                }
            }
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Skipped => {
                let line = agent_line(agent, state);
                match agents.remove(agent) {
                    Some(pb) => pb.finish_with_message(line),
                    None => {
                        let _ = self.multi.println(format!("  {line}"));
                    }
                }
            }
        }
    }

    fn finish(&self, status: SessionStatus) {
        for (_, pb) in Self::lock(&self.agents).drain() {
            pb.abandon();
        }
        if let Some(pb) = Self::lock(&self.overall).take() {
            let message = match status {
                SessionStatus::Completed => "complete!".green().to_string(),
                SessionStatus::Paused => "paused".yellow().to_string(),
                _ => status.to_string().red().to_string(),
            };
            pb.finish_with_message(message);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for ProgressReporter {
    fn on_event(&self, event: &SessionEvent) {
        match &event.kind {
            EventKind::AgentStateChanged {
                agent,
                state,
                overall_progress,
            } => self.on_agent_state(agent, state, *overall_progress),
            EventKind::LevelStarted { level, agents } => {
                self.overall_bar().set_message(format!(
                    "level {} ({} agents)",
                    level + 1,
                    agents.len()
                ));
            }
            EventKind::ConflictsDetected { added, .. } if *added > 0 => {
                let _ = self.multi.println(format!(
                    "  {} {added} conflicting finding pair(s) flagged",
                    "!".yellow()
                ));
            }
            EventKind::StatusChanged { to, .. }
                if to.is_finished() || *to == SessionStatus::Paused =>
            {
                self.finish(*to);
            }
            _ => {}
        }
    }
}

fn agent_line(agent: &str, state: &AgentState) -> String {
    match state.status {
        AgentStatus::Completed => format!("{} {}", "v".green(), agent),
        AgentStatus::Skipped => format!("{} {} (skipped)", "-".dimmed(), agent),
        _ => {
            let reason = state
                .error_info
                .as_ref()
                .map(|e| e.kind.to_string())
                .unwrap_or_else(|| "failed".to_string());
            format!("{} {} ({reason})", "x".red(), agent)
        }
    }
}

/// Simple text-based progress (no fancy UI)
pub struct SimpleProgress;

impl EventSubscriber for SimpleProgress {
    fn on_event(&self, event: &SessionEvent) {
        match &event.kind {
            EventKind::LevelStarted { level, agents } => {
                println!(
                    "{} {} ({})",
                    "->".cyan(),
                    format!("Level {}", level + 1).bold(),
                    agents.join(", ")
                );
            }
            EventKind::AgentStateChanged { agent, state, .. } if state.is_terminal() => {
                println!("  {}", agent_line(agent, state));
            }
            EventKind::PhaseChanged { to, .. } => {
                println!("{} {}", "::".dimmed(), to);
            }
            EventKind::PauseRequested => {
                println!("{} pause queued until the current level finishes", "::".dimmed());
            }
            _ => {}
        }
    }
}
