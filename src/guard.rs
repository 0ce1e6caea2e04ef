//! Per-agent guard policies: declarative JSON the hosted assistant runtime
//! evaluates from its pre-tool-use hook. The deployer writes the file; it
//! never interprets it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::Capability;
use crate::config::Layout;
use crate::error::ExitError;

/// Tools of the hosted runtime that spawn sub-agents natively. Blocked so
/// every spawn goes through the lifecycle manager.
const NATIVE_SPAWN_TOOLS: &[&str] = &["Task", "Agent"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardPolicy {
    pub version: u32,
    pub agent: String,
    pub capability: Capability,
    /// Write/Edit operations must resolve to paths under this root.
    pub write_root: PathBuf,
    /// False for capabilities that may not Write/Edit at all.
    pub allow_writes: bool,
    /// No push, no destructive history rewrites on these branches.
    pub protected_branches: Vec<String>,
    pub deny_history_rewrite: bool,
    pub blocked_tools: Vec<String>,
}

impl GuardPolicy {
    pub fn for_agent(
        agent_name: &str,
        capability: Capability,
        worktree: &Path,
        canonical_branch: &str,
    ) -> Self {
        Self {
            version: 1,
            agent: agent_name.to_string(),
            capability,
            write_root: worktree.to_path_buf(),
            allow_writes: !matches!(capability, Capability::Scout | Capability::Reviewer),
            protected_branches: vec![canonical_branch.to_string()],
            deny_history_rewrite: true,
            blocked_tools: NATIVE_SPAWN_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Write the policy into the checkout and mirror it under
/// `.overstory/hooks/<agent>.json` at the project root.
pub fn deploy(layout: &Layout, worktree: &Path, policy: &GuardPolicy) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(policy)
        .map_err(|e| ExitError::Agent(format!("encoding guard policy: {e}")))?;

    let in_checkout = worktree.join(".overstory");
    std::fs::create_dir_all(&in_checkout)
        .map_err(|e| ExitError::Agent(format!("creating {}: {e}", in_checkout.display())))?;
    let checkout_file = in_checkout.join("guards.json");
    std::fs::write(&checkout_file, &json)
        .map_err(|e| ExitError::Agent(format!("writing {}: {e}", checkout_file.display())))?;

    let hooks_dir = layout.hooks_dir();
    std::fs::create_dir_all(&hooks_dir)
        .map_err(|e| ExitError::Agent(format!("creating {}: {e}", hooks_dir.display())))?;
    let mirror = layout.hook_policy_file(&policy.agent);
    std::fs::write(&mirror, &json)
        .map_err(|e| ExitError::Agent(format!("writing {}: {e}", mirror.display())))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_writes_inside_checkout_only() {
        let policy = GuardPolicy::for_agent(
            "impl",
            Capability::Builder,
            Path::new("/repo/.overstory/worktrees/impl"),
            "main",
        );
        assert!(policy.allow_writes);
        assert_eq!(
            policy.write_root,
            PathBuf::from("/repo/.overstory/worktrees/impl")
        );
        assert_eq!(policy.protected_branches, vec!["main"]);
        assert!(policy.deny_history_rewrite);
        assert!(policy.blocked_tools.contains(&"Task".to_string()));
    }

    #[test]
    fn scout_and_reviewer_cannot_write() {
        for capability in [Capability::Scout, Capability::Reviewer] {
            let policy = GuardPolicy::for_agent("eyes", capability, Path::new("/wt"), "main");
            assert!(!policy.allow_writes);
        }
    }

    #[test]
    fn deploy_writes_both_copies() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        let worktree = tmp.path().join("wt");
        std::fs::create_dir_all(&worktree).unwrap();

        let policy = GuardPolicy::for_agent("impl", Capability::Builder, &worktree, "main");
        deploy(&layout, &worktree, &policy).unwrap();

        let in_checkout: GuardPolicy = serde_json::from_str(
            &std::fs::read_to_string(worktree.join(".overstory/guards.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(in_checkout, policy);

        let mirrored: GuardPolicy = serde_json::from_str(
            &std::fs::read_to_string(layout.hook_policy_file("impl")).unwrap(),
        )
        .unwrap();
        assert_eq!(mirrored, policy);
    }
}
