//! `overstory sling` — spawn a worker agent into its own checkout and
//! session.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::agent::{AgentManager, Capability, SpawnRequest};
use crate::error::ExitError;

use super::Workspace;

#[derive(Debug, Args)]
pub struct SlingArgs {
    /// Task identifier from the issue tracker
    #[arg(long)]
    pub task: String,
    /// Agent capability
    #[arg(long, value_enum)]
    pub capability: Capability,
    /// Unique agent name (also the session and branch fragment)
    #[arg(long)]
    pub name: String,
    /// Path to the task spec; copied under .overstory/specs/
    #[arg(long)]
    pub spec: Option<PathBuf>,
    /// File scope for the agent (comma-separated paths)
    #[arg(long, value_delimiter = ',')]
    pub files: Vec<String>,
    /// Parent agent name (required for builder/scout/reviewer/merger)
    #[arg(long, default_value = "")]
    pub parent: String,
    /// Depth in the agent hierarchy
    #[arg(long, default_value_t = 0)]
    pub depth: u32,
    /// Branch the new worktree is cut from (default: canonical branch)
    #[arg(long)]
    pub base_branch: Option<String>,
    /// Project root directory
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
    /// Emit the spawned agent record as JSON
    #[arg(long)]
    pub json: bool,
}

impl SlingArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let store = workspace.store()?;
        let manager = AgentManager::new(&workspace.config, &workspace.repo_root, &store);

        let spec_path = self.stage_spec(&workspace)?;

        let record = manager.spawn(&SpawnRequest {
            capability: self.capability,
            name: self.name.clone(),
            task_id: self.task.clone(),
            parent: self.parent.clone(),
            depth: self.depth,
            spec_path,
            file_scope: self.files.clone(),
            base_branch: self.base_branch.clone(),
        })?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            println!(
                "Spawned {} ({}) on {} in {}",
                record.name,
                record.capability.as_str(),
                record.branch,
                record.worktree.display()
            );
        }
        Ok(())
    }

    /// Place the spec under `.overstory/specs/<task>.md` and return the
    /// repo-relative path agents are pointed at.
    fn stage_spec(&self, workspace: &Workspace) -> anyhow::Result<String> {
        let destination = workspace.layout.spec_file(&self.task);

        if let Some(ref source) = self.spec {
            if !source.exists() {
                return Err(ExitError::Validation(format!(
                    "spec file {} does not exist",
                    source.display()
                ))
                .into());
            }
            let canonical_source = source.canonicalize().ok();
            let canonical_dest = destination.canonicalize().ok();
            if canonical_source.is_none() || canonical_source != canonical_dest {
                std::fs::create_dir_all(workspace.layout.specs_dir())
                    .context("creating specs directory")?;
                std::fs::copy(source, &destination)
                    .with_context(|| format!("copying spec to {}", destination.display()))?;
            }
        }

        Ok(format!(".overstory/specs/{}.md", self.task))
    }
}
