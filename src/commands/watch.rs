//! `overstory watch` — run the watchdog loop until interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Args;

use crate::agent::AgentManager;
use crate::assistant;
use crate::mail::store::MailStore;
use crate::mail::{MailFilter, MessageType};
use crate::session;
use crate::watchdog::{
    parse_triage_verdict, HealthInput, TriageVerdict, Watchdog, WatchdogAction,
};

use super::Workspace;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Run a single scan and exit (for cron-style drivers)
    #[arg(long)]
    pub once: bool,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl WatchArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let store = workspace.store()?;
        let manager = AgentManager::new(&workspace.config, &workspace.repo_root, &store);
        let mut watchdog = Watchdog::new(workspace.config.watchdog.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let stop_handler = stop.clone();
        let _ = ctrlc::set_handler(move || {
            stop_handler.store(true, Ordering::SeqCst);
        });

        let interval = Duration::from_millis(workspace.config.watchdog.tier1_interval_ms);
        eprintln!(
            "Watchdog running (interval {}s, stale {}s, zombie {}s)",
            interval.as_secs(),
            workspace.config.watchdog.stale_threshold_ms / 1000,
            workspace.config.watchdog.zombie_threshold_ms / 1000,
        );

        loop {
            let inputs = gather_inputs(&store)?;
            let actions = watchdog.scan(&inputs, Utc::now());
            for action in actions {
                execute_action(&workspace, &manager, &mut watchdog, &action);
            }

            if self.once || stop.load(Ordering::SeqCst) {
                break;
            }
            // Sleep in short slices so ctrl-c lands promptly.
            let mut remaining = interval;
            while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
                let slice = remaining.min(Duration::from_millis(250));
                std::thread::sleep(slice);
                remaining -= slice;
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }

        eprintln!("Watchdog stopped");
        Ok(())
    }
}

/// Snapshot every live agent's observable health from the roster, the
/// session list, and its mail history.
fn gather_inputs(store: &MailStore) -> anyhow::Result<Vec<HealthInput>> {
    let mut inputs = Vec::new();
    for record in store.list_agents()? {
        let session_alive = session::is_session_alive(&record.session_name());
        let sent = store.list(&MailFilter {
            from: Some(record.name.clone()),
            ..Default::default()
        })?;
        let reported_done = sent.iter().any(|m| m.msg_type == MessageType::WorkerDone);
        let last_activity = store
            .last_activity(&record.name)?
            .unwrap_or(record.spawned_at);

        inputs.push(HealthInput {
            name: record.name,
            session_alive,
            reported_done,
            last_activity,
        });
    }
    Ok(inputs)
}

fn execute_action(
    workspace: &Workspace,
    manager: &AgentManager<'_>,
    watchdog: &mut Watchdog,
    action: &WatchdogAction,
) {
    match action {
        WatchdogAction::Warn { agent, condition } => {
            tracing::warn!(agent = %agent, ?condition, "agent flagged by watchdog");
        }
        WatchdogAction::Nudge { agent } => {
            let text = format!(
                "overstory watchdog: no recent activity. Check mail with \
                 `overstory mail check --inject --agent {agent}` and continue, \
                 or send a status update."
            );
            if let Err(e) = session::send_keys(&session::session_name(agent), &text) {
                tracing::warn!(agent = %agent, "nudge failed: {e:#}");
            }
        }
        WatchdogAction::Triage { agent } => {
            run_triage(workspace, manager, watchdog, agent);
        }
        WatchdogAction::Terminate { agent } => {
            tracing::warn!(agent = %agent, "watchdog terminating agent");
            let report = manager.teardown(agent);
            if !report.clean() {
                tracing::warn!(agent = %agent, errors = ?report.errors, "teardown incomplete");
            }
        }
    }
}

/// Ask the assistant to classify a wedged-looking agent from its recent
/// session output.
fn run_triage(
    workspace: &Workspace,
    manager: &AgentManager<'_>,
    watchdog: &mut Watchdog,
    agent: &str,
) {
    let pane = session::capture_pane(&session::session_name(agent)).unwrap_or_default();
    let prompt = format!(
        "An autonomous coding agent named {agent} has gone quiet. Below is the\n\
         tail of its terminal session. Reply with exactly one word:\n\
         RETRY if it should be prodded to continue,\n\
         TERMINATE if it is wedged beyond recovery,\n\
         EXTEND if it looks busy and just needs more time.\n\n{pane}"
    );

    let verdict = match assistant::run_prompt(&workspace.config.assistant, &prompt) {
        Ok(output) => parse_triage_verdict(&output),
        Err(e) => {
            tracing::warn!(agent = %agent, "triage assistant failed: {e:#}");
            return; // ladder keeps climbing; termination comes next
        }
    };

    tracing::info!(agent = %agent, ?verdict, "triage verdict");
    match verdict {
        TriageVerdict::Terminate => {
            let report = manager.teardown(agent);
            if !report.clean() {
                tracing::warn!(agent = %agent, errors = ?report.errors, "teardown incomplete");
            }
        }
        TriageVerdict::Retry => {
            let text = format!(
                "overstory watchdog: please continue your task, or report what is \
                 blocking you via `overstory mail send`. ({agent})"
            );
            if let Err(e) = session::send_keys(&session::session_name(agent), &text) {
                tracing::warn!(agent = %agent, "retry nudge failed: {e:#}");
            }
        }
        TriageVerdict::Extend => watchdog.extend(agent),
    }
}
