//! Mail client: the facade workers and the orchestrator use to send,
//! list, and reply, plus the hook-side injection text builder.
//!
//! High/urgent sends and worker_done notices queue a pending nudge rather
//! than injecting keystrokes immediately. Injecting into a live terminal
//! races the assistant's own input buffer; the marker is drained at the
//! recipient's next prompt boundary instead.

use std::fmt::Write as FmtWrite;

use chrono::Utc;

use super::nudge::{NudgeRegistry, NudgeReason, PendingNudge};
use super::store::{MailStore, ReadOutcome};
use super::{Draft, MailFilter, Message, MessageType, Priority};

pub struct MailClient {
    store: MailStore,
    nudges: NudgeRegistry,
}

impl MailClient {
    pub fn new(store: MailStore, nudges: NudgeRegistry) -> Self {
        Self { store, nudges }
    }

    pub fn store(&self) -> &MailStore {
        &self.store
    }

    /// Send a message. Qualifying sends (high/urgent priority, or a
    /// worker_done notice) overwrite the recipient's pending-nudge marker.
    pub fn send(&self, draft: &Draft) -> anyhow::Result<i64> {
        let id = self.store.send(draft)?;

        if let Some(reason) = nudge_reason(draft.priority, draft.msg_type) {
            self.nudges.set(&PendingNudge {
                recipient: draft.to.clone(),
                sender: draft.from.clone(),
                subject: draft.subject.clone(),
                message_id: id,
                reason,
                created_at: Utc::now(),
            })?;
        }

        Ok(id)
    }

    pub fn list(&self, filter: &MailFilter) -> anyhow::Result<Vec<Message>> {
        self.store.list(filter)
    }

    pub fn get(&self, id: i64) -> anyhow::Result<Message> {
        self.store.get(id)
    }

    pub fn mark_read(&self, id: i64) -> anyhow::Result<ReadOutcome> {
        self.store.mark_read(id)
    }

    pub fn reply(&self, original_id: i64, from: &str, body: &str) -> anyhow::Result<i64> {
        self.store.reply(original_id, from, body)
    }

    /// Build the text the pre-prompt hook prepends for `recipient`, and
    /// drain the pending-nudge marker.
    ///
    /// Unread messages are listed oldest-first but are NOT marked read;
    /// only an explicit `mail read` does that.
    pub fn check_inject(&self, recipient: &str) -> anyhow::Result<String> {
        let mut text = String::new();

        if let Some(marker) = self.nudges.get(recipient) {
            let reason = marker.reason.as_str().to_uppercase();
            writeln!(text, "=== {reason} ===").unwrap();
            writeln!(text, "From: {}", marker.sender).unwrap();
            writeln!(text, "Subject: {}", marker.subject).unwrap();
            writeln!(text, "Message: #{}", marker.message_id).unwrap();
            self.nudges.clear(recipient);
        }

        let mut unread = self.store.list(&MailFilter {
            to: Some(recipient.to_string()),
            unread_only: true,
            ..Default::default()
        })?;
        unread.reverse(); // store lists newest-first; inject oldest-first

        if !unread.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            writeln!(text, "You have {} unread message(s):", unread.len()).unwrap();
            for message in &unread {
                writeln!(
                    text,
                    "\n[#{}] from {} | {} | {} | {}",
                    message.id,
                    message.from,
                    message.msg_type.as_str(),
                    message.priority.as_str(),
                    message.created_at.to_rfc3339(),
                )
                .unwrap();
                writeln!(text, "Subject: {}", message.subject).unwrap();
                writeln!(text, "{}", message.body).unwrap();
            }
        }

        Ok(text)
    }
}

/// Which nudge reason, if any, a send earns. Priority wins when both a
/// qualifying priority and a worker_done type apply.
fn nudge_reason(priority: Priority, msg_type: MessageType) -> Option<NudgeReason> {
    match priority {
        Priority::Urgent => Some(NudgeReason::UrgentPriority),
        Priority::High => Some(NudgeReason::HighPriority),
        Priority::Normal => {
            if msg_type == MessageType::WorkerDone {
                Some(NudgeReason::WorkerDone)
            } else {
                None
            }
        }
    }
}
