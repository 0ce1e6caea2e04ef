use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Top-level `.overstory/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_canonical_branch")]
    pub canonical_branch: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Delay between creating a session and sending its task beacon.
    #[serde(default = "default_stagger_delay_ms")]
    pub stagger_delay_ms: u64,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    /// Command that starts an interactive worker session inside a checkout.
    #[serde(default = "default_assistant_command")]
    pub command: String,
    /// One-shot prompt mode: stdin carries the prompt, stdout the completion.
    #[serde(default = "default_oneshot_args")]
    pub oneshot_args: Vec<String>,
    #[serde(default = "default_oneshot_timeout")]
    pub oneshot_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: default_assistant_command(),
            oneshot_args: default_oneshot_args(),
            oneshot_timeout_secs: default_oneshot_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    #[serde(default)]
    pub ai_resolve_enabled: bool,
    #[serde(default)]
    pub reimagine_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogConfig {
    #[serde(default = "default_tier1_interval_ms")]
    pub tier1_interval_ms: u64,
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    #[serde(default = "default_zombie_threshold_ms")]
    pub zombie_threshold_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tier1_interval_ms: default_tier1_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            zombie_threshold_ms: default_zombie_threshold_ms(),
        }
    }
}

fn default_canonical_branch() -> String {
    "main".into()
}
fn default_max_depth() -> u32 {
    3
}
fn default_stagger_delay_ms() -> u64 {
    2000
}
fn default_assistant_command() -> String {
    "claude".into()
}
fn default_oneshot_args() -> Vec<String> {
    vec!["--print".into()]
}
fn default_oneshot_timeout() -> u64 {
    300
}
fn default_tier1_interval_ms() -> u64 {
    30_000
}
fn default_stale_threshold_ms() -> u64 {
    300_000
}
fn default_zombie_threshold_ms() -> u64 {
    600_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            canonical_branch: default_canonical_branch(),
            max_depth: default_max_depth(),
            stagger_delay_ms: default_stagger_delay_ms(),
            assistant: AssistantConfig::default(),
            merge: MergeConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `<repo_root>/.overstory/config.yaml`.
    ///
    /// A missing file yields the defaults; a malformed one is a config error.
    pub fn load(repo_root: &Path) -> anyhow::Result<Self> {
        let path = Layout::new(repo_root).config_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&contents)
    }

    /// Parse config from a YAML string.
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ExitError::Config(format!("invalid config.yaml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_depth < 1 {
            return Err(ExitError::Config("maxDepth must be at least 1".into()).into());
        }
        if self.watchdog.zombie_threshold_ms <= self.watchdog.stale_threshold_ms {
            return Err(ExitError::Config(
                "zombieThresholdMs must be greater than staleThresholdMs".into(),
            )
            .into());
        }
        Ok(())
    }
}

/// On-disk layout of everything overstory persists under `<repoRoot>/.overstory/`.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            root: repo_root.join(".overstory"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn mail_db(&self) -> PathBuf {
        self.root.join("mail.db")
    }

    pub fn pending_nudges_dir(&self) -> PathBuf {
        self.root.join("pending-nudges")
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.root.join("specs")
    }

    pub fn spec_file(&self, task_id: &str) -> PathBuf {
        self.specs_dir().join(format!("{task_id}.md"))
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.root.join("hooks")
    }

    pub fn hook_policy_file(&self, agent: &str) -> PathBuf {
        self.hooks_dir().join(format!("{agent}.json"))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let yaml = r#"
canonicalBranch: trunk
maxDepth: 4
staggerDelayMs: 500
assistant:
  command: claude
  oneshotArgs: ["--print"]
  oneshotTimeoutSecs: 120
merge:
  aiResolveEnabled: true
  reimagineEnabled: true
watchdog:
  tier1IntervalMs: 10000
  staleThresholdMs: 60000
  zombieThresholdMs: 120000
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.canonical_branch, "trunk");
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.stagger_delay_ms, 500);
        assert!(config.merge.ai_resolve_enabled);
        assert!(config.merge.reimagine_enabled);
        assert_eq!(config.watchdog.tier1_interval_ms, 10_000);
    }

    #[test]
    fn parse_empty_yields_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.canonical_branch, "main");
        assert_eq!(config.max_depth, 3);
        assert!(!config.merge.ai_resolve_enabled);
        assert!(!config.merge.reimagine_enabled);
        assert_eq!(config.watchdog.tier1_interval_ms, 30_000);
        assert_eq!(config.watchdog.stale_threshold_ms, 300_000);
        assert_eq!(config.watchdog.zombie_threshold_ms, 600_000);
        assert_eq!(config.assistant.command, "claude");
    }

    #[test]
    fn parse_rejects_inverted_thresholds() {
        let yaml = r#"
watchdog:
  staleThresholdMs: 600000
  zombieThresholdMs: 300000
"#;
        let result = Config::parse(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("zombieThresholdMs"));
    }

    #[test]
    fn parse_rejects_zero_max_depth() {
        assert!(Config::parse("maxDepth: 0").is_err());
    }

    #[test]
    fn parse_malformed_yaml() {
        let result = Config::parse(": not yaml :");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("invalid config.yaml"));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.canonical_branch, "main");
    }

    #[test]
    fn layout_paths() {
        let layout = Layout::new(Path::new("/repo"));
        assert_eq!(layout.mail_db(), PathBuf::from("/repo/.overstory/mail.db"));
        assert_eq!(
            layout.spec_file("T1"),
            PathBuf::from("/repo/.overstory/specs/T1.md")
        );
        assert_eq!(
            layout.hook_policy_file("impl"),
            PathBuf::from("/repo/.overstory/hooks/impl.json")
        );
    }
}
