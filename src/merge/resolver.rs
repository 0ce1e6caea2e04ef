//! Four-tier merge resolution against the canonical branch.
//!
//! Tier 1 takes clean merges. Tier 2 strips conflict markers, keeping the
//! incoming (agent) side. Tier 3 hands residual files to the assistant.
//! Tier 4 abandons the merge and asks the assistant to reimplement the
//! agent's change onto the canonical version. Tiers 3 and 4 are heuristic
//! and individually gated by config.
//!
//! Whatever happens, the working copy is clean when `resolve` returns:
//! every non-success path aborts the in-progress merge and restores files
//! it wrote.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::assistant;
use crate::config::{AssistantConfig, MergeConfig};
use crate::error::trim_stderr;
use crate::subprocess::Tool;

use super::{MergeEntry, MergeOutcome, MergeStatus, ResolvedTier};

/// Merges mutate one canonical branch; two resolutions must never overlap.
static CANONICAL_MERGE: Mutex<()> = Mutex::new(());

pub struct Resolver<'a> {
    repo_root: PathBuf,
    canonical_branch: String,
    merge_config: &'a MergeConfig,
    assistant_config: &'a AssistantConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(
        repo_root: &Path,
        canonical_branch: &str,
        merge_config: &'a MergeConfig,
        assistant_config: &'a AssistantConfig,
    ) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            canonical_branch: canonical_branch.to_string(),
            merge_config,
            assistant_config,
        }
    }

    /// Resolve one entry to a terminal state. Never returns with a dirty
    /// working copy.
    pub fn resolve(&self, entry: MergeEntry) -> MergeOutcome {
        let _guard = CANONICAL_MERGE
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        tracing::info!(branch = %entry.branch_name, "resolving merge");
        match self.try_tiers(&entry) {
            Ok((tier, conflict_files)) => {
                let mut entry = entry;
                entry.status = MergeStatus::Merged;
                entry.resolved_tier = Some(tier);
                tracing::info!(branch = %entry.branch_name, tier = tier.as_str(), "merge landed");
                MergeOutcome {
                    entry,
                    success: true,
                    tier: Some(tier),
                    conflict_files,
                    error_message: None,
                }
            }
            Err(failure) => {
                self.abort_in_progress();
                let mut entry = entry;
                entry.status = MergeStatus::Failed;
                entry.resolved_tier = None;
                tracing::warn!(
                    branch = %entry.branch_name,
                    error = %failure.message,
                    "merge failed at every enabled tier"
                );
                MergeOutcome {
                    entry,
                    success: false,
                    tier: None,
                    conflict_files: failure.conflict_files,
                    error_message: Some(failure.message),
                }
            }
        }
    }

    fn try_tiers(&self, entry: &MergeEntry) -> Result<(ResolvedTier, Vec<String>), TierFailure> {
        self.git_ok(&["checkout", &self.canonical_branch])
            .map_err(|m| TierFailure::new(m, vec![]))?;

        // Tier 1: clean merge.
        let (merged, merge_output) = self
            .git(&["merge", "--no-edit", &entry.branch_name])
            .map_err(|m| TierFailure::new(m, vec![]))?;
        if merged {
            return Ok((ResolvedTier::CleanMerge, vec![]));
        }
        if !merge_output.contains("CONFLICT") {
            return Err(TierFailure::new(
                format!(
                    "merge of {} failed without conflicts: {}",
                    entry.branch_name,
                    trim_stderr(&merge_output)
                ),
                vec![],
            ));
        }

        // Tier 2: strip markers, keep the incoming side.
        let conflict_files = self
            .conflicted_paths()
            .map_err(|m| TierFailure::new(m, vec![]))?;
        let mut residual = Vec::new();
        for path in &conflict_files {
            let full = self.repo_root.join(path);
            let content = match std::fs::read_to_string(&full) {
                Ok(c) => c,
                // Delete/modify conflicts may leave no working-copy file.
                Err(_) => {
                    residual.push(path.clone());
                    continue;
                }
            };
            if has_conflict_markers(&content) {
                let resolved = keep_incoming_side(&content);
                if let Err(e) = std::fs::write(&full, resolved) {
                    return Err(TierFailure::new(
                        format!("writing {}: {e}", full.display()),
                        conflict_files.clone(),
                    ));
                }
            } else {
                residual.push(path.clone());
            }
        }

        if residual.is_empty() {
            self.stage_and_commit(&conflict_files, None)
                .map_err(|m| TierFailure::new(m, conflict_files.clone()))?;
            return Ok((ResolvedTier::AutoResolve, conflict_files));
        }

        // Tier 3: assistant rewrites the residual files in place.
        if self.merge_config.ai_resolve_enabled {
            let attempt = self
                .ai_resolve(entry, &residual)
                .and_then(|()| self.stage_and_commit(&conflict_files, None));
            match attempt {
                Ok(()) => return Ok((ResolvedTier::AiResolve, conflict_files)),
                Err(message) => {
                    tracing::warn!(error = %message, "ai-resolve tier failed");
                }
            }
        }

        // Tier 4: abandon the merge, reimplement the change onto canonical.
        if self.merge_config.reimagine_enabled {
            self.abort_in_progress();
            match self.reimagine(entry) {
                Ok(()) => return Ok((ResolvedTier::Reimagine, conflict_files)),
                Err(message) => {
                    return Err(TierFailure::new(message, conflict_files));
                }
            }
        }

        Err(TierFailure::new(
            format!(
                "unresolved conflicts in {} and no further tier enabled: {}",
                entry.branch_name,
                residual.join(", ")
            ),
            conflict_files,
        ))
    }

    fn ai_resolve(&self, entry: &MergeEntry, residual: &[String]) -> Result<(), String> {
        for path in residual {
            let full = self.repo_root.join(path);
            let current = std::fs::read_to_string(&full).unwrap_or_default();
            let prompt = ai_resolve_prompt(
                path,
                &self.canonical_branch,
                &entry.branch_name,
                &current,
            );
            let output = assistant::run_prompt(self.assistant_config, &prompt)
                .map_err(|e| format!("assistant on {path}: {e:#}"))?;
            std::fs::write(&full, output).map_err(|e| format!("writing {path}: {e}"))?;
        }
        Ok(())
    }

    fn reimagine(&self, entry: &MergeEntry) -> Result<(), String> {
        let mut written: Vec<String> = Vec::new();
        let result = (|| {
            for path in &entry.files_modified {
                let canonical_version = self.show_file(&self.canonical_branch, path);
                let branch_version = self.show_file(&entry.branch_name, path);
                let prompt = reimagine_prompt(
                    path,
                    &self.canonical_branch,
                    &entry.branch_name,
                    &canonical_version,
                    &branch_version,
                );
                let output = assistant::run_prompt(self.assistant_config, &prompt)
                    .map_err(|e| format!("assistant on {path}: {e:#}"))?;

                let full = self.repo_root.join(path);
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("creating {}: {e}", parent.display()))?;
                }
                std::fs::write(&full, output).map_err(|e| format!("writing {path}: {e}"))?;
                written.push(path.clone());
            }

            let message = format!(
                "Reimagine {} onto {}",
                entry.branch_name, self.canonical_branch
            );
            self.stage_and_commit(&entry.files_modified, Some(&message))
        })();

        if result.is_err() {
            self.restore_files(&written);
        }
        result
    }

    fn conflicted_paths(&self) -> Result<Vec<String>, String> {
        let (ok, combined, stdout) =
            self.git_full(&["diff", "--name-only", "--diff-filter=U"])?;
        if !ok {
            return Err(format!("listing conflicted paths: {combined}"));
        }
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn stage_and_commit(&self, paths: &[String], message: Option<&str>) -> Result<(), String> {
        if !paths.is_empty() {
            let mut args = vec!["add", "--"];
            args.extend(paths.iter().map(String::as_str));
            self.git_ok(&args)?;
        }
        match message {
            // During a conflicted merge the default merge message applies.
            None => self.git_ok(&["commit", "--no-edit"]),
            Some(m) => self.git_ok(&["commit", "-m", m]),
        }
    }

    /// Abort any in-progress merge; harmless when there is none.
    fn abort_in_progress(&self) {
        let _ = Tool::new("git")
            .args(&["merge", "--abort"])
            .cwd(&self.repo_root)
            .run();
    }

    /// Restore files the resolver wrote outside a merge. Tracked files are
    /// checked out from HEAD; files that only exist because we wrote them
    /// are deleted.
    fn restore_files(&self, paths: &[String]) {
        for path in paths {
            let restored = Tool::new("git")
                .args(&["checkout", "--", path])
                .cwd(&self.repo_root)
                .run()
                .map(|o| o.success())
                .unwrap_or(false);
            if !restored {
                let _ = std::fs::remove_file(self.repo_root.join(path));
            }
        }
    }

    fn show_file(&self, branch: &str, path: &str) -> String {
        Tool::new("git")
            .args(&["show", &format!("{branch}:{path}")])
            .cwd(&self.repo_root)
            .run()
            .ok()
            .filter(|o| o.success())
            .map(|o| o.stdout)
            .unwrap_or_default()
    }

    /// Run git, returning (success, combined stdout+stderr).
    fn git(&self, args: &[&str]) -> Result<(bool, String), String> {
        let (ok, combined, _) = self.git_full(args)?;
        Ok((ok, combined))
    }

    fn git_full(&self, args: &[&str]) -> Result<(bool, String, String), String> {
        let output = Tool::new("git")
            .args(args)
            .cwd(&self.repo_root)
            .run()
            .map_err(|e| format!("git {}: {e:#}", args.join(" ")))?;
        let combined = format!("{}{}", output.stdout, output.stderr);
        Ok((output.success(), combined, output.stdout))
    }

    fn git_ok(&self, args: &[&str]) -> Result<(), String> {
        let (ok, combined) = self.git(args)?;
        if ok {
            Ok(())
        } else {
            Err(format!("git {}: {}", args.join(" "), trim_stderr(&combined)))
        }
    }
}

struct TierFailure {
    message: String,
    conflict_files: Vec<String>,
}

impl TierFailure {
    fn new(message: String, conflict_files: Vec<String>) -> Self {
        Self {
            message,
            conflict_files,
        }
    }
}

fn has_conflict_markers(content: &str) -> bool {
    let mut has_start = false;
    let mut has_sep = false;
    let mut has_end = false;
    for line in content.lines() {
        if line.starts_with("<<<<<<<") {
            has_start = true;
        } else if line.starts_with("=======") {
            has_sep = true;
        } else if line.starts_with(">>>>>>>") {
            has_end = true;
        }
    }
    has_start && has_sep && has_end
}

/// Drop the HEAD side of every conflict hunk, keeping the incoming
/// (agent-branch) side and all surrounding context.
fn keep_incoming_side(content: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Context,
        Head,
        Incoming,
    }

    let mut out = String::new();
    let mut state = State::Context;
    for line in content.lines() {
        match state {
            State::Context if line.starts_with("<<<<<<<") => state = State::Head,
            State::Head if line.starts_with("=======") => state = State::Incoming,
            State::Incoming if line.starts_with(">>>>>>>") => state = State::Context,
            State::Head => {}
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

fn ai_resolve_prompt(path: &str, canonical: &str, branch: &str, current: &str) -> String {
    format!(
        "You are resolving a git merge conflict in `{path}`.\n\
         The canonical branch is `{canonical}`; the incoming branch is `{branch}`.\n\
         Below is the current working-copy content, which may contain conflict\n\
         markers or reflect a delete/modify conflict. Output ONLY the full\n\
         resolved file content, no commentary, no code fences.\n\n\
         {current}"
    )
}

fn reimagine_prompt(
    path: &str,
    canonical: &str,
    branch: &str,
    canonical_version: &str,
    branch_version: &str,
) -> String {
    format!(
        "A merge of branch `{branch}` into `{canonical}` could not be resolved\n\
         mechanically. Reimplement the intent of the branch's change to `{path}`\n\
         on top of the canonical version. Output ONLY the full new file content,\n\
         no commentary, no code fences.\n\n\
         --- {canonical}:{path} ---\n{canonical_version}\n\
         --- {branch}:{path} ---\n{branch_version}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_complete_marker_sets() {
        let conflicted = "<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> feature\n";
        assert!(has_conflict_markers(conflicted));
        assert!(!has_conflict_markers("plain content\n"));
        // A lone separator line (e.g. a markdown rule) is not a conflict.
        assert!(!has_conflict_markers("title\n=======\nbody\n"));
    }

    #[test]
    fn keep_incoming_drops_head_side() {
        let conflicted = "\
before
<<<<<<< HEAD
main modified
=======
feature
>>>>>>> feature
after
";
        assert_eq!(keep_incoming_side(conflicted), "before\nfeature\nafter\n");
    }

    #[test]
    fn keep_incoming_handles_multiple_hunks() {
        let conflicted = "\
<<<<<<< HEAD
a-ours
=======
a-theirs
>>>>>>> feature
middle
<<<<<<< HEAD
b-ours
=======
b-theirs
>>>>>>> feature
";
        assert_eq!(
            keep_incoming_side(conflicted),
            "a-theirs\nmiddle\nb-theirs\n"
        );
    }

    #[test]
    fn keep_incoming_preserves_separator_lines_outside_hunks() {
        let content = "title\n=======\nbody\n";
        assert_eq!(keep_incoming_side(content), content);
    }

    #[test]
    fn prompts_name_both_branches() {
        let p = ai_resolve_prompt("src/a.rs", "main", "overstory/impl/T1", "content");
        assert!(p.contains("main"));
        assert!(p.contains("overstory/impl/T1"));
        assert!(p.contains("src/a.rs"));

        let p = reimagine_prompt("src/a.rs", "main", "overstory/impl/T1", "old", "new");
        assert!(p.contains("old"));
        assert!(p.contains("new"));
    }
}
