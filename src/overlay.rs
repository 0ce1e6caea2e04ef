//! Per-agent instruction overlay, materialized into the checkout exactly
//! once at spawn time: a static base section for the capability plus the
//! dynamic assignment block.

use std::path::{Path, PathBuf};

use minijinja::Environment;
use serde::Serialize;

use crate::agent::Capability;
use crate::error::ExitError;

const OVERLAY_TEMPLATE: &str = include_str!("templates/agent-overlay.md.jinja");

/// File name of the overlay inside the checkout.
pub const OVERLAY_FILE: &str = "AGENTS.md";

/// Context data passed to the overlay template.
#[derive(Debug, Serialize)]
pub struct OverlayContext {
    pub name: String,
    pub capability: Capability,
    pub task_id: String,
    pub depth: u32,
    pub can_spawn: bool,
    pub spec_path: String,
    pub file_scope: Vec<String>,
}

/// Render the overlay for an agent.
pub fn render(ctx: &OverlayContext) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template("agent-overlay", OVERLAY_TEMPLATE)
        .map_err(|e| ExitError::Agent(format!("loading overlay template: {e}")))?;
    let template = env
        .get_template("agent-overlay")
        .map_err(|e| ExitError::Agent(format!("loading overlay template: {e}")))?;
    Ok(template
        .render(ctx)
        .map_err(|e| ExitError::Agent(format!("rendering overlay: {e}")))?)
}

/// Render and write the overlay into `worktree`, returning its path.
pub fn materialize(worktree: &Path, ctx: &OverlayContext) -> anyhow::Result<PathBuf> {
    let rendered = render(ctx)?;
    let path = worktree.join(OVERLAY_FILE);
    std::fs::write(&path, rendered)
        .map_err(|e| ExitError::Agent(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(capability: Capability) -> OverlayContext {
        OverlayContext {
            name: "impl".into(),
            capability,
            task_id: "T1".into(),
            depth: 1,
            can_spawn: capability.can_spawn(),
            spec_path: ".overstory/specs/T1.md".into(),
            file_scope: vec!["src/a.ts".into()],
        }
    }

    #[test]
    fn builder_overlay_has_assignment_block() {
        let rendered = render(&ctx(Capability::Builder)).unwrap();
        assert!(rendered.contains("# Agent: impl"));
        assert!(rendered.contains("Task: T1"));
        assert!(rendered.contains("Depth: 1"));
        assert!(rendered.contains("May spawn sub-agents: no"));
        assert!(rendered.contains("src/a.ts"));
        assert!(rendered.contains("worker_done"));
    }

    #[test]
    fn lead_overlay_can_spawn() {
        let rendered = render(&ctx(Capability::Lead)).unwrap();
        assert!(rendered.contains("May spawn sub-agents: yes"));
        assert!(rendered.contains("overstory sling"));
    }

    #[test]
    fn scout_overlay_forbids_writes() {
        let rendered = render(&ctx(Capability::Scout)).unwrap();
        assert!(rendered.contains("write nothing"));
    }

    #[test]
    fn empty_file_scope_is_unrestricted() {
        let mut context = ctx(Capability::Builder);
        context.file_scope.clear();
        let rendered = render(&context).unwrap();
        assert!(rendered.contains("unrestricted within this checkout"));
    }

    #[test]
    fn materialize_writes_agents_md() {
        let tmp = tempfile::tempdir().unwrap();
        let path = materialize(tmp.path(), &ctx(Capability::Builder)).unwrap();
        assert_eq!(path, tmp.path().join("AGENTS.md"));
        assert!(std::fs::read_to_string(path).unwrap().contains("Task: T1"));
    }
}
