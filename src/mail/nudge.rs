//! Pending-nudge markers: one JSON file per recipient under
//! `.overstory/pending-nudges/`, overwritten by each qualifying send and
//! drained at the recipient's next prompt boundary.
//!
//! Deliberately lock-free; last-write-wins is the wanted property (the
//! marker always refers to the latest urgent message).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Why a nudge is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeReason {
    UrgentPriority,
    HighPriority,
    WorkerDone,
}

impl NudgeReason {
    /// Human-readable form used in the injection banner.
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeReason::UrgentPriority => "urgent priority",
            NudgeReason::HighPriority => "high priority",
            NudgeReason::WorkerDone => "worker_done",
        }
    }
}

/// The single-slot marker for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNudge {
    pub recipient: String,
    pub sender: String,
    pub subject: String,
    pub message_id: i64,
    pub reason: NudgeReason,
    pub created_at: DateTime<Utc>,
}

/// File-per-recipient registry rooted at a pending-nudges directory.
#[derive(Debug, Clone)]
pub struct NudgeRegistry {
    dir: PathBuf,
}

impl NudgeRegistry {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn marker_path(&self, recipient: &str) -> PathBuf {
        self.dir.join(format!("{recipient}.json"))
    }

    /// Write (or overwrite) the marker for a recipient.
    pub fn set(&self, marker: &PendingNudge) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ExitError::Mail(format!("creating {}: {e}", self.dir.display())))?;
        let json = serde_json::to_string_pretty(marker)
            .map_err(|e| ExitError::Mail(format!("encoding nudge marker: {e}")))?;
        let path = self.marker_path(&marker.recipient);
        std::fs::write(&path, json)
            .map_err(|e| ExitError::Mail(format!("writing {}: {e}", path.display())))?;
        Ok(())
    }

    /// Read the marker for a recipient. Missing file (or directory) means
    /// no pending nudge; a corrupt marker is treated the same after a warn.
    pub fn get(&self, recipient: &str) -> Option<PendingNudge> {
        let path = self.marker_path(recipient);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(marker) => Some(marker),
            Err(e) => {
                tracing::warn!("discarding corrupt nudge marker {}: {e}", path.display());
                None
            }
        }
    }

    /// Remove the marker for a recipient, if present.
    pub fn clear(&self, recipient: &str) {
        let _ = std::fs::remove_file(self.marker_path(recipient));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(recipient: &str, message_id: i64, reason: NudgeReason) -> PendingNudge {
        PendingNudge {
            recipient: recipient.to_string(),
            sender: "orchestrator".into(),
            subject: "subject".into(),
            message_id,
            reason,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn set_get_clear_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = NudgeRegistry::new(&tmp.path().join("pending-nudges"));

        assert!(registry.get("builder-1").is_none());
        registry
            .set(&marker("builder-1", 7, NudgeReason::UrgentPriority))
            .unwrap();

        let got = registry.get("builder-1").unwrap();
        assert_eq!(got.message_id, 7);
        assert_eq!(got.reason, NudgeReason::UrgentPriority);

        registry.clear("builder-1");
        assert!(registry.get("builder-1").is_none());
    }

    #[test]
    fn latest_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = NudgeRegistry::new(&tmp.path().join("pending-nudges"));

        registry
            .set(&marker("impl", 1, NudgeReason::HighPriority))
            .unwrap();
        registry
            .set(&marker("impl", 2, NudgeReason::WorkerDone))
            .unwrap();

        let got = registry.get("impl").unwrap();
        assert_eq!(got.message_id, 2);
        assert_eq!(got.reason, NudgeReason::WorkerDone);
    }

    #[test]
    fn missing_directory_is_empty() {
        let registry = NudgeRegistry::new(Path::new("/nonexistent/pending-nudges"));
        assert!(registry.get("anyone").is_none());
        registry.clear("anyone");
    }

    #[test]
    fn corrupt_marker_reads_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("pending-nudges");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("impl.json"), "{ not json").unwrap();

        let registry = NudgeRegistry::new(&dir);
        assert!(registry.get("impl").is_none());
    }

    #[test]
    fn reason_banner_text() {
        assert_eq!(NudgeReason::UrgentPriority.as_str(), "urgent priority");
        assert_eq!(NudgeReason::HighPriority.as_str(), "high priority");
        assert_eq!(NudgeReason::WorkerDone.as_str(), "worker_done");
    }
}
