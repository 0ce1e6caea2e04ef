//! Detached terminal sessions, one per agent, managed through tmux.
//!
//! Session names follow the `overstory-{agent}` convention so stray
//! sessions are identifiable in `tmux ls` output.

use std::path::Path;

use crate::error::{trim_stderr, ExitError};
use crate::subprocess::Tool;

/// tmux session name for an agent.
pub fn session_name(agent_name: &str) -> String {
    format!("overstory-{agent_name}")
}

/// One live session as reported by `tmux list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub name: String,
    /// Pid of the session leader process.
    pub pid: u32,
}

/// Start a detached session running `command` in `cwd`, returning the
/// session leader's pid. Fails if a session with this name already exists.
pub fn create_session(name: &str, cwd: &Path, command: &str) -> anyhow::Result<u32> {
    if is_session_alive(name) {
        return Err(ExitError::Session(format!("session {name} already exists")).into());
    }

    let output = Tool::new("tmux")
        .args(&[
            "new-session",
            "-d",
            "-s",
            name,
            "-c",
            &cwd.to_string_lossy(),
            command,
        ])
        .run()?;

    if !output.success() {
        return Err(ExitError::Session(trim_stderr(&output.stderr)).into());
    }

    let pid = list_sessions()?
        .into_iter()
        .find(|s| s.name == name)
        .map(|s| s.pid)
        .ok_or_else(|| ExitError::Session(format!("session {name} vanished after create")))?;

    Ok(pid)
}

/// List live sessions. A host with no tmux server running has no sessions,
/// which is not an error.
pub fn list_sessions() -> anyhow::Result<Vec<SessionInfo>> {
    let output = Tool::new("tmux")
        .args(&["list-sessions", "-F", "#{session_name}:#{pid}"])
        .run()?;

    if !output.success() {
        let stderr = output.stderr.to_lowercase();
        if stderr.contains("no server running") || stderr.contains("no sessions") {
            return Ok(Vec::new());
        }
        return Err(ExitError::Session(trim_stderr(&output.stderr)).into());
    }

    Ok(parse_session_list(&output.stdout))
}

/// Kill a session by name.
pub fn kill_session(name: &str) -> anyhow::Result<()> {
    Tool::new("tmux")
        .args(&["kill-session", "-t", name])
        .run_ok()
        .map_err(|e| ExitError::Session(format!("killing {name}: {e:#}")))?;
    Ok(())
}

/// Check whether a session exists.
pub fn is_session_alive(name: &str) -> bool {
    Tool::new("tmux")
        .args(&["has-session", "-t", name])
        .run()
        .map(|o| o.success())
        .unwrap_or(false)
}

/// Deliver text to a session, followed by Enter.
pub fn send_keys(name: &str, text: &str) -> anyhow::Result<()> {
    let output = Tool::new("tmux")
        .args(&["send-keys", "-t", name, text, "Enter"])
        .run()?;
    if !output.success() {
        return Err(ExitError::Session(trim_stderr(&output.stderr)).into());
    }
    Ok(())
}

/// Capture the visible pane contents of a session (watchdog triage input).
pub fn capture_pane(name: &str) -> anyhow::Result<String> {
    let output = Tool::new("tmux")
        .args(&["capture-pane", "-p", "-t", name])
        .run()?;
    if !output.success() {
        return Err(ExitError::Session(trim_stderr(&output.stderr)).into());
    }
    Ok(output.stdout)
}

fn parse_session_list(stdout: &str) -> Vec<SessionInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, pid) = line.rsplit_once(':')?;
            Some(SessionInfo {
                name: name.to_string(),
                pid: pid.trim().parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_name_convention() {
        assert_eq!(session_name("impl"), "overstory-impl");
    }

    #[test]
    fn parse_session_list_basic() {
        let parsed = parse_session_list("overstory-impl:1234\noverstory-scout:5678\n");
        assert_eq!(
            parsed,
            vec![
                SessionInfo {
                    name: "overstory-impl".into(),
                    pid: 1234
                },
                SessionInfo {
                    name: "overstory-scout".into(),
                    pid: 5678
                },
            ]
        );
    }

    #[test]
    fn parse_session_list_handles_colons_in_name() {
        // rsplit keeps everything before the last colon as the name
        let parsed = parse_session_list("weird:name:42\n");
        assert_eq!(parsed[0].name, "weird:name");
        assert_eq!(parsed[0].pid, 42);
    }

    #[test]
    fn parse_session_list_skips_garbage() {
        let parsed = parse_session_list("no-pid-here\nok:7\n:not-a-number\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "ok");
    }

    #[test]
    fn parse_session_list_empty() {
        assert!(parse_session_list("").is_empty());
    }
}
