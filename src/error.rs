use std::process::ExitCode;

/// Errors that cause overstory to exit with a specific code.
///
/// Each variant carries the responsible subsystem label so operators can
/// tell at a glance which layer failed.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("worktree error: {0}")]
    Worktree(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("mail error: {0}")]
    Mail(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::Validation(_) => ExitCode::from(3),
            ExitError::Worktree(_) => ExitCode::from(4),
            ExitError::Session(_) => ExitCode::from(5),
            ExitError::Agent(_) => ExitCode::from(6),
            ExitError::Mail(_) => ExitCode::from(7),
            ExitError::Merge(_) => ExitCode::from(8),
            ExitError::ToolNotFound { .. } => ExitCode::from(9),
            ExitError::ToolFailed { .. } => ExitCode::from(10),
            ExitError::Timeout { .. } => ExitCode::from(11),
        }
    }
}

/// Trim a tool's stderr for inclusion in a user-visible failure.
///
/// Keeps the first 500 characters, cut at a char boundary.
pub fn trim_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= 500 {
        return trimmed.to_string();
    }
    let mut end = 500;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
