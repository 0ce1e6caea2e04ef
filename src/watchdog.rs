//! Periodic health scanning with graduated escalation.
//!
//! The scan itself is side-effect free: callers gather a [`HealthInput`]
//! per live agent, hand it in with the current time, and execute the
//! returned actions (log, tmux nudge, AI triage, teardown). Keeping the
//! clock explicit lets tests drive the ladder deterministically.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::WatchdogConfig;

/// Snapshot of one agent's observable health.
#[derive(Debug, Clone)]
pub struct HealthInput {
    pub name: String,
    pub session_alive: bool,
    /// The agent sent a worker_done message; a dead session is then expected.
    pub reported_done: bool,
    /// Last mail the agent sent, or its spawn time if it never wrote.
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Healthy,
    Stale,
    Zombie,
}

/// What the driver should do this scan. At most one action per agent;
/// each ladder level fires once as the condition persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    Warn { agent: String, condition: Condition },
    Nudge { agent: String },
    Triage { agent: String },
    Terminate { agent: String },
}

/// AI triage outcome for a flagged agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageVerdict {
    Retry,
    Terminate,
    Extend,
}

/// Interpret the assistant's triage completion. Unrecognized output errs
/// on the side of giving the agent more time.
pub fn parse_triage_verdict(output: &str) -> TriageVerdict {
    let lower = output.to_lowercase();
    if lower.contains("terminate") {
        TriageVerdict::Terminate
    } else if lower.contains("retry") {
        TriageVerdict::Retry
    } else {
        TriageVerdict::Extend
    }
}

#[derive(Debug, Default)]
struct FlagState {
    consecutive: u32,
    acted_level: Option<u32>,
}

pub struct Watchdog {
    config: WatchdogConfig,
    states: HashMap<String, FlagState>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    /// Classify one agent at `now`.
    pub fn classify(&self, input: &HealthInput, now: DateTime<Utc>) -> Condition {
        if !input.session_alive {
            return if input.reported_done {
                Condition::Healthy
            } else {
                Condition::Zombie
            };
        }
        let age = now - input.last_activity;
        if age > Duration::milliseconds(self.config.zombie_threshold_ms as i64) {
            Condition::Zombie
        } else if age > Duration::milliseconds(self.config.stale_threshold_ms as i64) {
            Condition::Stale
        } else {
            Condition::Healthy
        }
    }

    /// Run one scan over the live agents.
    ///
    /// The ladder steps a level every second consecutive flagged scan:
    /// scan 1 warns, scan 3 nudges, scan 5 triages, scan 7 terminates.
    /// A healthy scan (new mail, session back, condition cleared) resets.
    pub fn scan(&mut self, inputs: &[HealthInput], now: DateTime<Utc>) -> Vec<WatchdogAction> {
        let mut actions = Vec::new();

        for input in inputs {
            let condition = self.classify(input, now);
            if condition == Condition::Healthy {
                self.states.remove(&input.name);
                continue;
            }

            let state = self.states.entry(input.name.clone()).or_default();
            state.consecutive += 1;
            let level = ((state.consecutive - 1) / 2).min(3);
            if state.acted_level == Some(level) {
                continue;
            }
            state.acted_level = Some(level);

            actions.push(match level {
                0 => WatchdogAction::Warn {
                    agent: input.name.clone(),
                    condition,
                },
                1 => WatchdogAction::Nudge {
                    agent: input.name.clone(),
                },
                2 => WatchdogAction::Triage {
                    agent: input.name.clone(),
                },
                _ => WatchdogAction::Terminate {
                    agent: input.name.clone(),
                },
            });
        }

        // Forget agents that disappeared from the roster.
        self.states
            .retain(|name, _| inputs.iter().any(|i| &i.name == name));

        actions
    }

    /// Triage asked for more time: restart the ladder for this agent.
    pub fn extend(&mut self, agent: &str) {
        self.states.remove(agent);
    }
}
