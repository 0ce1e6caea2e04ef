//! Merge pipeline types: queue entries, outcomes, and the strict FIFO
//! ordering the drain loop honors.

pub mod resolver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of a merge entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Merged,
    Failed,
}

/// Which tier of the escalation ladder resolved a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvedTier {
    CleanMerge,
    AutoResolve,
    AiResolve,
    Reimagine,
}

impl ResolvedTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedTier::CleanMerge => "clean-merge",
            ResolvedTier::AutoResolve => "auto-resolve",
            ResolvedTier::AiResolve => "ai-resolve",
            ResolvedTier::Reimagine => "reimagine",
        }
    }
}

/// One branch waiting to land on the canonical branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeEntry {
    pub branch_name: String,
    pub task_id: String,
    pub agent_name: String,
    pub files_modified: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
    pub status: MergeStatus,
    pub resolved_tier: Option<ResolvedTier>,
}

impl MergeEntry {
    pub fn new(
        branch_name: &str,
        task_id: &str,
        agent_name: &str,
        files_modified: Vec<String>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            branch_name: branch_name.to_string(),
            task_id: task_id.to_string(),
            agent_name: agent_name.to_string(),
            files_modified,
            enqueued_at,
            status: MergeStatus::Pending,
            resolved_tier: None,
        }
    }
}

/// What `resolve` hands back. On failure the error message is set and the
/// resolved tier stays empty.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub entry: MergeEntry,
    pub success: bool,
    pub tier: Option<ResolvedTier>,
    pub conflict_files: Vec<String>,
    pub error_message: Option<String>,
}

/// Strict FIFO ordering: enqueue time ascending, branch name as the
/// tie-break.
pub fn queue_order(a: &MergeEntry, b: &MergeEntry) -> std::cmp::Ordering {
    a.enqueued_at
        .cmp(&b.enqueued_at)
        .then_with(|| a.branch_name.cmp(&b.branch_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(branch: &str, secs: i64) -> MergeEntry {
        MergeEntry::new(
            branch,
            "T1",
            "impl",
            vec![],
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    #[test]
    fn queue_orders_by_enqueue_time() {
        let mut entries = vec![entry("b", 200), entry("a", 100)];
        entries.sort_by(queue_order);
        assert_eq!(entries[0].branch_name, "a");
        assert_eq!(entries[1].branch_name, "b");
    }

    #[test]
    fn queue_ties_break_on_branch_name() {
        let mut entries = vec![entry("zeta", 100), entry("alpha", 100)];
        entries.sort_by(queue_order);
        assert_eq!(entries[0].branch_name, "alpha");
        assert_eq!(entries[1].branch_name, "zeta");
    }

    #[test]
    fn tier_labels() {
        assert_eq!(ResolvedTier::CleanMerge.as_str(), "clean-merge");
        assert_eq!(ResolvedTier::AutoResolve.as_str(), "auto-resolve");
        assert_eq!(ResolvedTier::AiResolve.as_str(), "ai-resolve");
        assert_eq!(ResolvedTier::Reimagine.as_str(), "reimagine");
    }
}
