//! `overstory status` — report live agents and their mailboxes.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::session;

use super::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub agents: Vec<AgentStatus>,
    pub pending_merges: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub capability: String,
    pub task_id: String,
    pub parent: String,
    pub depth: u32,
    pub branch: String,
    pub can_spawn: bool,
    pub session_alive: bool,
    pub unread: usize,
    pub last_activity: Option<String>,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let format = self.format.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Pretty
            } else {
                OutputFormat::Text
            }
        });

        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let store = workspace.store()?;

        let mut agents = Vec::new();
        for record in store.list_agents()? {
            agents.push(AgentStatus {
                session_alive: session::is_session_alive(&record.session_name()),
                unread: store.unread_count(&record.name)?,
                last_activity: store
                    .last_activity(&record.name)?
                    .map(|t| t.to_rfc3339()),
                can_spawn: record.can_spawn(),
                name: record.name,
                capability: record.capability.as_str().to_string(),
                task_id: record.task_id,
                parent: record.parent,
                depth: record.depth,
                branch: record.branch,
            });
        }

        let pending_merges = store
            .list(&crate::mail::MailFilter {
                to: Some(crate::mail::ORCHESTRATOR.to_string()),
                unread_only: true,
                ..Default::default()
            })?
            .iter()
            .filter(|m| m.msg_type == crate::mail::MessageType::WorkerDone)
            .count();

        let report = StatusReport {
            agents,
            pending_merges,
        };

        match format {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}

fn print_pretty(report: &StatusReport) {
    println!("=== Overstory Status ===\n");
    if report.agents.is_empty() {
        println!("No live agents");
    }
    for agent in &report.agents {
        let alive = if agent.session_alive { "alive" } else { "dead" };
        println!(
            "  \u{2022} {} ({}) task={} depth={} [{}]",
            agent.name, agent.capability, agent.task_id, agent.depth, alive
        );
        println!("      branch {}   unread {}", agent.branch, agent.unread);
        if let Some(ref ts) = agent.last_activity {
            println!("      last activity {ts}");
        }
    }
    println!("\nPending merges: {}", report.pending_merges);
}

fn print_text(report: &StatusReport) {
    println!("overstory-status");
    for agent in &report.agents {
        println!(
            "agent  name={}  capability={}  task={}  parent={}  depth={}  branch={}  alive={}  unread={}",
            agent.name,
            agent.capability,
            agent.task_id,
            agent.parent,
            agent.depth,
            agent.branch,
            agent.session_alive,
            agent.unread,
        );
    }
    println!("pending-merges  count={}", report.pending_merges);
}
