//! `overstory teardown` — best-effort cleanup of one agent: session,
//! worktree, roster entry, and any pending nudge.

use std::path::PathBuf;

use clap::Args;

use crate::agent::AgentManager;
use crate::mail::nudge::NudgeRegistry;

use super::Workspace;

#[derive(Debug, Args)]
pub struct TeardownArgs {
    /// Agent name to tear down
    pub name: String,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl TeardownArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let store = workspace.store()?;
        let manager = AgentManager::new(&workspace.config, &workspace.repo_root, &store);

        let report = manager.teardown(&self.name);
        NudgeRegistry::new(&workspace.layout.pending_nudges_dir()).clear(&self.name);

        if report.clean() {
            println!("Tore down {}", self.name);
        } else {
            // Teardown always makes progress; leftovers are reported, not fatal.
            println!("Tore down {} with leftovers:", self.name);
            for error in &report.errors {
                eprintln!("  - {error}");
            }
        }
        Ok(())
    }
}
