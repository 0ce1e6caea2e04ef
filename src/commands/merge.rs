//! `overstory merge` — drain the merge queue, strictly one branch at a
//! time, and report outcomes back to each worker's parent.

use std::path::PathBuf;

use clap::Args;

use crate::error::ExitError;
use crate::mail::client::MailClient;
use crate::mail::store::MailStore;
use crate::mail::{Draft, MailFilter, MessageType, Priority, ProtocolPayload, ORCHESTRATOR};
use crate::merge::resolver::Resolver;
use crate::merge::{queue_order, MergeEntry, MergeOutcome};

use super::Workspace;

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Show the queue without resolving anything
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl MergeArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let client = workspace.mail_client()?;

        let queue = build_queue(client.store())?;
        if queue.is_empty() {
            println!("Merge queue is empty");
            return Ok(());
        }

        if self.dry_run {
            for (_, entry) in &queue {
                println!(
                    "pending  {}  (task {}, agent {}, enqueued {})",
                    entry.branch_name,
                    entry.task_id,
                    entry.agent_name,
                    entry.enqueued_at.to_rfc3339()
                );
            }
            return Ok(());
        }

        let resolver = Resolver::new(
            &workspace.repo_root,
            &workspace.config.canonical_branch,
            &workspace.config.merge,
            &workspace.config.assistant,
        );

        let mut failures = Vec::new();
        for (message_id, entry) in queue {
            let branch = entry.branch_name.clone();
            let outcome = resolver.resolve(entry);

            notify_parent(&client, &outcome)?;
            client.mark_read(message_id)?;

            match outcome.tier {
                Some(tier) => println!("merged  {branch}  ({})", tier.as_str()),
                None => {
                    let reason = outcome
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "unknown".into());
                    println!("failed  {branch}  ({reason})");
                    failures.push(branch);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExitError::Merge(format!(
                "{} branch(es) escalated past every enabled tier: {}",
                failures.len(),
                failures.join(", ")
            ))
            .into())
        }
    }
}

/// The merge queue is derived from unread worker_done mail addressed to
/// the orchestrator, in strict enqueue order.
fn build_queue(store: &MailStore) -> anyhow::Result<Vec<(i64, MergeEntry)>> {
    let messages = store.list(&MailFilter {
        to: Some(ORCHESTRATOR.to_string()),
        unread_only: true,
        ..Default::default()
    })?;

    let mut queue = Vec::new();
    for message in messages {
        if message.msg_type != MessageType::WorkerDone {
            continue;
        }
        match message.protocol_payload() {
            Some(ProtocolPayload::WorkerDone {
                branch,
                task_id,
                files_modified,
            }) => {
                queue.push((
                    message.id,
                    MergeEntry::new(
                        &branch,
                        &task_id,
                        &message.from,
                        files_modified,
                        message.created_at,
                    ),
                ));
            }
            _ => {
                tracing::warn!(
                    id = message.id,
                    from = %message.from,
                    "worker_done message without a usable payload; skipping"
                );
            }
        }
    }

    queue.sort_by(|(_, a), (_, b)| queue_order(a, b));
    Ok(queue)
}

/// Send the terminal outcome to the worker's parent (or the worker itself
/// when no parent is on record).
fn notify_parent(client: &MailClient, outcome: &MergeOutcome) -> anyhow::Result<()> {
    let entry = &outcome.entry;
    let parent = client
        .store()
        .get_agent(&entry.agent_name)?
        .map(|record| record.parent)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| entry.agent_name.clone());

    let draft = match outcome.tier {
        Some(tier) => Draft::new(
            ORCHESTRATOR,
            &parent,
            &format!("Merged {}", entry.branch_name),
            &format!(
                "Branch {} landed on the canonical branch via {}.",
                entry.branch_name,
                tier.as_str()
            ),
        )
        .msg_type(MessageType::Merged)
        .payload(&ProtocolPayload::Merged {
            tier: tier.as_str().to_string(),
        }),
        None => {
            let reason = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| "merge failed".into());
            Draft::new(
                ORCHESTRATOR,
                &parent,
                &format!("Merge escalation: {}", entry.branch_name),
                &format!(
                    "Branch {} could not be merged automatically: {reason}",
                    entry.branch_name
                ),
            )
            .msg_type(MessageType::Escalation)
            .priority(Priority::High)
            .payload(&ProtocolPayload::Escalation { reason })
        }
    };

    client.send(&draft)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_done_draft(from: &str, branch: &str) -> Draft {
        Draft::new(from, ORCHESTRATOR, "done", "finished")
            .msg_type(MessageType::WorkerDone)
            .payload(&ProtocolPayload::WorkerDone {
                branch: branch.to_string(),
                task_id: "T1".to_string(),
                files_modified: vec!["src/a.ts".to_string()],
            })
    }

    #[test]
    fn build_queue_orders_and_skips_non_protocol_mail() {
        let store = MailStore::open_in_memory().unwrap();
        store
            .send(&Draft::new("impl", ORCHESTRATOR, "status", "working"))
            .unwrap();
        store.send(&worker_done_draft("impl-b", "overstory/impl-b/T2")).unwrap();
        store.send(&worker_done_draft("impl-a", "overstory/impl-a/T1")).unwrap();

        let queue = build_queue(&store).unwrap();
        assert_eq!(queue.len(), 2);
        // Same-timestamp sends fall back to branch-name order.
        let branches: Vec<&str> = queue.iter().map(|(_, e)| e.branch_name.as_str()).collect();
        let mut sorted = branches.clone();
        sorted.sort();
        assert_eq!(branches, sorted);
    }

    #[test]
    fn build_queue_ignores_read_messages() {
        let store = MailStore::open_in_memory().unwrap();
        let id = store
            .send(&worker_done_draft("impl", "overstory/impl/T1"))
            .unwrap();
        store.mark_read(id).unwrap();
        assert!(build_queue(&store).unwrap().is_empty());
    }

    #[test]
    fn build_queue_skips_payloadless_worker_done() {
        let store = MailStore::open_in_memory().unwrap();
        store
            .send(&Draft::new("impl", ORCHESTRATOR, "done", "no payload")
                .msg_type(MessageType::WorkerDone))
            .unwrap();
        assert!(build_queue(&store).unwrap().is_empty());
    }
}
