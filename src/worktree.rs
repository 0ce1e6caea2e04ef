//! Working-copy management: one isolated git worktree per agent, each on
//! its own `overstory/{agent}/{task}` branch.

use std::path::{Path, PathBuf};

use crate::error::{trim_stderr, ExitError};
use crate::subprocess::Tool;

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: String,
    /// Branch name with the `refs/heads/` prefix stripped; empty when detached.
    pub branch: String,
}

/// A freshly created checkout.
#[derive(Debug, Clone)]
pub struct CreatedWorktree {
    pub path: PathBuf,
    pub branch: String,
}

/// Branch name for an agent working a task.
pub fn branch_name(agent_name: &str, task_id: &str) -> String {
    format!("overstory/{agent_name}/{task_id}")
}

/// Create a new worktree for `agent_name` at `<base_dir>/<agent_name>`,
/// on a new branch cut from `base_branch`.
///
/// Fails if the branch already exists or the path is occupied; git's
/// stderr is surfaced verbatim.
pub fn create(
    repo_root: &Path,
    base_dir: &Path,
    agent_name: &str,
    base_branch: &str,
    task_id: &str,
) -> anyhow::Result<CreatedWorktree> {
    let branch = branch_name(agent_name, task_id);
    let path = base_dir.join(agent_name);

    std::fs::create_dir_all(base_dir).map_err(|e| {
        ExitError::Worktree(format!("creating {}: {e}", base_dir.display()))
    })?;

    let output = Tool::new("git")
        .args(&[
            "worktree",
            "add",
            "-b",
            &branch,
            &path.to_string_lossy(),
            base_branch,
        ])
        .cwd(repo_root)
        .run()?;

    if !output.success() {
        return Err(ExitError::Worktree(trim_stderr(&output.stderr)).into());
    }

    Ok(CreatedWorktree { path, branch })
}

/// List all worktrees of the repository.
pub fn list(repo_root: &Path) -> anyhow::Result<Vec<WorktreeEntry>> {
    let output = Tool::new("git")
        .args(&["worktree", "list", "--porcelain"])
        .cwd(repo_root)
        .run()?;

    if !output.success() {
        return Err(ExitError::Worktree(trim_stderr(&output.stderr)).into());
    }

    Ok(parse_porcelain(&output.stdout))
}

/// Remove a worktree, then try to delete its branch.
///
/// Two-phase on purpose: the branch may legitimately fail to delete (work
/// not merged yet) and that must never block checkout cleanup. Failure to
/// remove the checkout itself is fatal. If the path is not in the listing,
/// the branch-delete step is skipped.
pub fn remove(repo_root: &Path, path: &Path) -> anyhow::Result<()> {
    let branch = list(repo_root)?
        .into_iter()
        .find(|w| w.path == path)
        .map(|w| w.branch)
        .filter(|b| !b.is_empty());

    let output = Tool::new("git")
        .args(&["worktree", "remove", &path.to_string_lossy()])
        .cwd(repo_root)
        .run()?;

    if !output.success() {
        return Err(ExitError::Worktree(trim_stderr(&output.stderr)).into());
    }

    if let Some(branch) = branch {
        // "not fully merged" and friends are expected here
        let _ = Tool::new("git")
            .args(&["branch", "-d", &branch])
            .cwd(repo_root)
            .run();
    }

    Ok(())
}

fn parse_porcelain(stdout: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head = String::new();
    let mut branch = String::new();

    for line in stdout.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let Some(p) = path.take() {
                entries.push(WorktreeEntry {
                    path: p,
                    head: std::mem::take(&mut head),
                    branch: std::mem::take(&mut branch),
                });
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string();
        }
        // "detached" and "bare" lines carry no data we need
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_format() {
        assert_eq!(branch_name("impl", "T1"), "overstory/impl/T1");
    }

    #[test]
    fn parse_porcelain_strips_refs_prefix() {
        let stdout = "\
worktree /repo
HEAD 0123456789abcdef
branch refs/heads/main

worktree /repo/.overstory/worktrees/impl
HEAD fedcba9876543210
branch refs/heads/overstory/impl/T1
";
        let entries = parse_porcelain(stdout);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].branch, "main");
        assert_eq!(entries[1].path, PathBuf::from("/repo/.overstory/worktrees/impl"));
        assert_eq!(entries[1].branch, "overstory/impl/T1");
    }

    #[test]
    fn parse_porcelain_detached_head() {
        let stdout = "\
worktree /repo/detached
HEAD 0123456789abcdef
detached
";
        let entries = parse_porcelain(stdout);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch, "");
    }

    #[test]
    fn parse_porcelain_empty() {
        assert!(parse_porcelain("").is_empty());
    }

    // Integration against real git.

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let out = Tool::new("git").args(args).cwd(dir).run().unwrap();
            assert!(out.success(), "git {args:?}: {}", out.stderr);
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);
    }

    #[test]
    fn create_list_remove_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path();
        init_repo(repo);

        let base_dir = repo.join(".overstory/worktrees");
        let created = create(repo, &base_dir, "impl", "main", "T1").unwrap();
        assert_eq!(created.branch, "overstory/impl/T1");
        assert!(created.path.join("README.md").exists());

        let listed = list(repo).unwrap();
        assert!(listed.iter().any(|w| w.branch == "overstory/impl/T1"));

        remove(repo, &created.path).unwrap();
        let listed = list(repo).unwrap();
        assert!(!listed.iter().any(|w| w.branch == "overstory/impl/T1"));
        assert!(!created.path.exists());
    }

    #[test]
    fn create_fails_on_existing_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path();
        init_repo(repo);

        let base_dir = repo.join(".overstory/worktrees");
        create(repo, &base_dir, "impl", "main", "T1").unwrap();
        let result = create(repo, &base_dir.join("other"), "impl", "main", "T1");
        assert!(result.is_err());
    }

    #[test]
    fn remove_unknown_path_skips_branch_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path();
        init_repo(repo);

        // Not a worktree: the remove itself fails, branch-delete never runs.
        let result = remove(repo, &repo.join("no-such-checkout"));
        assert!(result.is_err());
    }
}
