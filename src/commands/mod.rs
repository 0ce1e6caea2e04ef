pub mod mail;
pub mod merge;
pub mod sling;
pub mod status;
pub mod teardown;
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{Config, Layout};
use crate::mail::client::MailClient;
use crate::mail::nudge::NudgeRegistry;
use crate::mail::store::MailStore;

/// Everything a command handler needs: the repo root, its config, and the
/// `.overstory/` layout. Explicitly constructed so tests can point one at
/// a temp directory.
pub struct Workspace {
    pub repo_root: PathBuf,
    pub config: Config,
    pub layout: Layout,
}

impl Workspace {
    /// Resolve from an explicit `--repo-root` or the current directory.
    pub fn resolve(repo_root: Option<&Path>) -> anyhow::Result<Self> {
        let repo_root = match repo_root {
            Some(p) => p.to_path_buf(),
            None => std::env::current_dir().context("getting current directory")?,
        };
        let config = Config::load(&repo_root)?;
        let layout = Layout::new(&repo_root);
        Ok(Self {
            repo_root,
            config,
            layout,
        })
    }

    pub fn store(&self) -> anyhow::Result<MailStore> {
        MailStore::open(&self.layout.mail_db())
    }

    pub fn mail_client(&self) -> anyhow::Result<MailClient> {
        Ok(MailClient::new(
            self.store()?,
            NudgeRegistry::new(&self.layout.pending_nudges_dir()),
        ))
    }
}
