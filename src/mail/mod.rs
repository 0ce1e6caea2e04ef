//! Persistent mailbox shared by the orchestrator and every worker agent.
//!
//! Coordination between processes happens entirely through this store and
//! the pending-nudge markers next to it; nothing here assumes a shared
//! address space.

pub mod client;
pub mod nudge;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved sender/recipient name for the human-driven top-level session.
pub const ORCHESTRATOR: &str = "orchestrator";

/// Message classification. Protocol types carry a typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum MessageType {
    Status,
    Question,
    Result,
    Error,
    WorkerDone,
    MergeReady,
    Merged,
    Escalation,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Status => "status",
            MessageType::Question => "question",
            MessageType::Result => "result",
            MessageType::Error => "error",
            MessageType::WorkerDone => "worker_done",
            MessageType::MergeReady => "merge_ready",
            MessageType::Merged => "merged",
            MessageType::Escalation => "escalation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status" => Some(MessageType::Status),
            "question" => Some(MessageType::Question),
            "result" => Some(MessageType::Result),
            "error" => Some(MessageType::Error),
            "worker_done" => Some(MessageType::WorkerDone),
            "merge_ready" => Some(MessageType::MergeReady),
            "merged" => Some(MessageType::Merged),
            "escalation" => Some(MessageType::Escalation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// A mail row. Created by the sender; only the recipient (or its hook)
/// flips the read flag; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub in_reply_to: Option<i64>,
}

impl Message {
    pub fn is_unread(&self) -> bool {
        self.read_at.is_none()
    }

    /// Decode the payload of a protocol message, if present and well-formed.
    pub fn protocol_payload(&self) -> Option<ProtocolPayload> {
        self.payload
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// An outgoing message before the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct Draft {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub msg_type: MessageType,
    pub priority: Priority,
    pub payload: Option<serde_json::Value>,
}

impl Draft {
    pub fn new(from: &str, to: &str, subject: &str, body: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            msg_type: MessageType::Status,
            priority: Priority::Normal,
            payload: None,
        }
    }

    pub fn msg_type(mut self, msg_type: MessageType) -> Self {
        self.msg_type = msg_type;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload(mut self, payload: &ProtocolPayload) -> Self {
        self.payload = serde_json::to_value(payload).ok();
        self
    }
}

/// Typed payloads for protocol messages. Persisted as an opaque JSON blob;
/// the store never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolPayload {
    WorkerDone {
        branch: String,
        task_id: String,
        files_modified: Vec<String>,
    },
    MergeReady {
        branch: String,
    },
    Merged {
        tier: String,
    },
    Escalation {
        reason: String,
    },
}

/// Query filter for listing mail.
#[derive(Debug, Clone, Default)]
pub struct MailFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    pub unread_only: bool,
    pub limit: Option<usize>,
}
