//! Agent lifecycle: spawn composes the worktree, overlay, guard, and
//! session layers into one transactional-feeling operation with
//! compensating teardown; teardown itself is best-effort and idempotent.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, Layout};
use crate::error::ExitError;
use crate::guard::{self, GuardPolicy};
use crate::mail::store::MailStore;
use crate::overlay::{self, OverlayContext};
use crate::{session, worktree};

/// What an agent is allowed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Coordinator,
    Lead,
    Builder,
    Scout,
    Reviewer,
    Merger,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Coordinator => "coordinator",
            Capability::Lead => "lead",
            Capability::Builder => "builder",
            Capability::Scout => "scout",
            Capability::Reviewer => "reviewer",
            Capability::Merger => "merger",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coordinator" => Some(Capability::Coordinator),
            "lead" => Some(Capability::Lead),
            "builder" => Some(Capability::Builder),
            "scout" => Some(Capability::Scout),
            "reviewer" => Some(Capability::Reviewer),
            "merger" => Some(Capability::Merger),
            _ => None,
        }
    }

    /// Only coordinators and leads may spawn sub-agents.
    pub fn can_spawn(&self) -> bool {
        matches!(self, Capability::Coordinator | Capability::Lead)
    }

    /// Leaf capabilities must have a parent agent.
    pub fn requires_parent(&self) -> bool {
        matches!(
            self,
            Capability::Builder | Capability::Scout | Capability::Reviewer | Capability::Merger
        )
    }
}

/// One live agent: its checkout, branch, and terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub capability: Capability,
    pub task_id: String,
    /// Empty for coordinator/lead agents spawned by the operator.
    pub parent: String,
    pub depth: u32,
    pub branch: String,
    pub worktree: PathBuf,
    pub session_pid: Option<u32>,
    pub spawned_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn session_name(&self) -> String {
        session::session_name(&self.name)
    }

    pub fn can_spawn(&self) -> bool {
        self.capability.can_spawn()
    }
}

/// Everything `spawn` needs to know.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub capability: Capability,
    pub name: String,
    pub task_id: String,
    pub parent: String,
    pub depth: u32,
    pub spec_path: String,
    pub file_scope: Vec<String>,
    /// Branch the new worktree is cut from; defaults to the canonical branch.
    pub base_branch: Option<String>,
}

/// Errors collected by a best-effort teardown. Never propagated as a
/// failure; teardown must always make progress.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub errors: Vec<String>,
}

impl TeardownReport {
    pub fn clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct AgentManager<'a> {
    config: &'a Config,
    repo_root: PathBuf,
    layout: Layout,
    store: &'a MailStore,
}

impl<'a> AgentManager<'a> {
    pub fn new(config: &'a Config, repo_root: &Path, store: &'a MailStore) -> Self {
        Self {
            config,
            repo_root: repo_root.to_path_buf(),
            layout: Layout::new(repo_root),
            store,
        }
    }

    /// Spawn an agent. Every step is fatal on failure and unwinds whatever
    /// was already built.
    pub fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<AgentRecord> {
        self.validate(request)?;
        let _lock = NameLock::acquire(&self.layout, &request.name)?;

        let created = worktree::create(
            &self.repo_root,
            &self.layout.worktrees_dir(),
            &request.name,
            request
                .base_branch
                .as_deref()
                .unwrap_or(&self.config.canonical_branch),
            &request.task_id,
        )?;

        if let Err(e) = self.prepare_checkout(request, &created.path) {
            let _ = worktree::remove(&self.repo_root, &created.path);
            return Err(e);
        }

        let name = session::session_name(&request.name);
        let pid = match session::create_session(&name, &created.path, &self.config.assistant.command)
        {
            Ok(pid) => pid,
            Err(e) => {
                let _ = worktree::remove(&self.repo_root, &created.path);
                return Err(e);
            }
        };

        // The session needs a beat to reach its prompt before the beacon.
        std::thread::sleep(Duration::from_millis(self.config.stagger_delay_ms));
        if let Err(e) = session::send_keys(&name, &task_beacon(request)) {
            let _ = session::kill_session(&name);
            let _ = worktree::remove(&self.repo_root, &created.path);
            return Err(e);
        }

        let record = AgentRecord {
            name: request.name.clone(),
            capability: request.capability,
            task_id: request.task_id.clone(),
            parent: request.parent.clone(),
            depth: request.depth,
            branch: created.branch,
            worktree: created.path,
            session_pid: Some(pid),
            spawned_at: Utc::now(),
        };
        self.store.upsert_agent(&record)?;

        tracing::info!(
            agent = %record.name,
            capability = record.capability.as_str(),
            branch = %record.branch,
            pid,
            "spawned agent"
        );
        Ok(record)
    }

    /// Tear an agent down: kill the session if alive, remove the worktree,
    /// drop the roster entry. Errors are collected, never propagated.
    pub fn teardown(&self, name: &str) -> TeardownReport {
        let mut report = TeardownReport::default();
        let _lock = match NameLock::acquire(&self.layout, name) {
            Ok(lock) => Some(lock),
            Err(e) => {
                report.errors.push(format!("{e:#}"));
                None
            }
        };

        let session_name = session::session_name(name);
        if session::is_session_alive(&session_name) {
            if let Err(e) = session::kill_session(&session_name) {
                report.errors.push(format!("killing session: {e:#}"));
            }
        }

        let path = match self.store.get_agent(name) {
            Ok(Some(record)) => record.worktree,
            Ok(None) => self.layout.worktrees_dir().join(name),
            Err(e) => {
                report.errors.push(format!("looking up agent: {e:#}"));
                self.layout.worktrees_dir().join(name)
            }
        };
        if path.exists() {
            if let Err(e) = worktree::remove(&self.repo_root, &path) {
                report.errors.push(format!("removing worktree: {e:#}"));
            }
        }

        if let Err(e) = self.store.remove_agent(name) {
            report.errors.push(format!("dropping roster entry: {e:#}"));
        }

        if report.clean() {
            tracing::info!(agent = name, "tore down agent");
        } else {
            tracing::warn!(agent = name, errors = ?report.errors, "teardown finished with errors");
        }
        report
    }

    fn validate(&self, request: &SpawnRequest) -> anyhow::Result<()> {
        if request.name.is_empty()
            || !request
                .name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            || request.name.starts_with('-')
            || request.name.len() > 64
        {
            return Err(ExitError::Validation(format!(
                "agent name {:?} must match [a-z0-9][a-z0-9-]*, max 64 chars",
                request.name
            ))
            .into());
        }

        // A child at depth >= maxDepth would outgrow the hierarchy, so an
        // agent sitting at maxDepth-1 can never spawn.
        if request.depth >= self.config.max_depth {
            return Err(ExitError::Validation(format!(
                "depth {} exceeds the hierarchy bound (maxDepth {})",
                request.depth, self.config.max_depth
            ))
            .into());
        }

        if request.capability.requires_parent() && request.parent.is_empty() {
            return Err(ExitError::Validation(format!(
                "{} agents require a parent",
                request.capability.as_str()
            ))
            .into());
        }

        let session_name = session::session_name(&request.name);
        if session::is_session_alive(&session_name) {
            return Err(ExitError::Validation(format!(
                "an agent named {} is already running (session {session_name})",
                request.name
            ))
            .into());
        }
        if self.store.get_agent(&request.name)?.is_some() {
            return Err(ExitError::Validation(format!(
                "agent name {} is already registered",
                request.name
            ))
            .into());
        }

        Ok(())
    }

    fn prepare_checkout(&self, request: &SpawnRequest, path: &Path) -> anyhow::Result<()> {
        overlay::materialize(
            path,
            &OverlayContext {
                name: request.name.clone(),
                capability: request.capability,
                task_id: request.task_id.clone(),
                depth: request.depth,
                can_spawn: request.capability.can_spawn()
                    && request.depth + 1 < self.config.max_depth,
                spec_path: request.spec_path.clone(),
                file_scope: request.file_scope.clone(),
            },
        )?;

        let policy = GuardPolicy::for_agent(
            &request.name,
            request.capability,
            path,
            &self.config.canonical_branch,
        );
        guard::deploy(&self.layout, path, &policy)
    }
}

/// Initial prompt that starts the assistant working.
fn task_beacon(request: &SpawnRequest) -> String {
    format!(
        "You are agent {}. Read {} in this directory, then work task {} per {}. \
         Check mail with: overstory mail check --inject --agent {}",
        request.name,
        overlay::OVERLAY_FILE,
        request.task_id,
        request.spec_path,
        request.name,
    )
}

/// On-disk mutual exclusion between spawn and teardown for one agent name.
struct NameLock {
    path: PathBuf,
}

impl NameLock {
    fn acquire(layout: &Layout, name: &str) -> anyhow::Result<Self> {
        let dir = layout.locks_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ExitError::Agent(format!("creating {}: {e}", dir.display())))?;
        let path = dir.join(format!("{name}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(ExitError::Agent(
                format!("another spawn/teardown of {name} is in progress"),
            )
            .into()),
            Err(e) => {
                Err(ExitError::Agent(format!("locking {}: {e}", path.display())).into())
            }
        }
    }
}

impl Drop for NameLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
