//! One-shot assistant invocations: stdin carries the prompt, stdout the
//! completion. Used by the merge resolver (tiers 3 and 4) and the
//! watchdog's triage step.

use std::time::Duration;

use crate::config::AssistantConfig;
use crate::error::{trim_stderr, ExitError};
use crate::subprocess::Tool;

/// Run a single prompt through the assistant CLI and return its stdout.
pub fn run_prompt(config: &AssistantConfig, prompt: &str) -> anyhow::Result<String> {
    let args: Vec<&str> = config.oneshot_args.iter().map(String::as_str).collect();
    let output = Tool::new(&config.command)
        .args(&args)
        .stdin(prompt)
        .timeout(Duration::from_secs(config.oneshot_timeout_secs))
        .run()?;

    if !output.success() {
        return Err(ExitError::ToolFailed {
            tool: config.command.clone(),
            code: output.exit_code,
            message: trim_stderr(&output.stderr),
        }
        .into());
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_prompt_pipes_stdin_to_stdout() {
        // `cat` stands in for an assistant that echoes its prompt.
        let config = AssistantConfig {
            command: "cat".into(),
            oneshot_args: vec![],
            oneshot_timeout_secs: 5,
        };
        let out = run_prompt(&config, "resolve this conflict").unwrap();
        assert_eq!(out, "resolve this conflict");
    }

    #[test]
    fn run_prompt_fails_on_nonzero_exit() {
        let config = AssistantConfig {
            command: "false".into(),
            oneshot_args: vec![],
            oneshot_timeout_secs: 5,
        };
        let err = run_prompt(&config, "anything").unwrap_err();
        assert!(err.downcast_ref::<ExitError>().is_some());
    }
}
