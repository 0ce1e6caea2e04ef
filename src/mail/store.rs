//! SQLite-backed mailbox, WAL mode so the orchestrator and every worker
//! process can write concurrently.
//!
//! The store is the single source of id and timestamp truth: callers hand
//! it a [`Draft`] and get the assigned row id back. Agent records are
//! mirrored here so `status` and `watch` can run from a different process
//! than the one that spawned the agents.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::agent::{AgentRecord, Capability};
use crate::error::ExitError;

use super::{Draft, MailFilter, Message, MessageType, Priority};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender      TEXT NOT NULL,
    recipient   TEXT NOT NULL,
    subject     TEXT NOT NULL,
    body        TEXT NOT NULL,
    msg_type    TEXT NOT NULL,
    priority    TEXT NOT NULL,
    payload     TEXT,
    created_at  TEXT NOT NULL,
    read_at     TEXT,
    in_reply_to INTEGER REFERENCES messages(id)
);
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(recipient, read_at);
CREATE INDEX IF NOT EXISTS idx_messages_recipient_created
    ON messages(recipient, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_sender_created
    ON messages(sender, created_at);

CREATE TABLE IF NOT EXISTS agents (
    name        TEXT PRIMARY KEY,
    capability  TEXT NOT NULL,
    task_id     TEXT NOT NULL,
    parent      TEXT NOT NULL DEFAULT '',
    depth       INTEGER NOT NULL DEFAULT 0,
    branch      TEXT NOT NULL,
    worktree    TEXT NOT NULL,
    session_pid INTEGER,
    spawned_at  TEXT NOT NULL
);
";

/// Result of a `mark_read` call; the second call on the same id is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Marked,
    AlreadyRead,
}

pub struct MailStore {
    conn: Connection,
}

impl MailStore {
    /// Open (creating if needed) the mail database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ExitError::Mail(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ExitError::Mail(format!("opening {}: {e}", path.display())))?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ExitError::Mail(format!("opening in-memory store: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| ExitError::Mail(format!("setting busy timeout: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| ExitError::Mail(format!("enabling WAL: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| ExitError::Mail(format!("enabling foreign keys: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| ExitError::Mail(format!("applying schema: {e}")))?;
        Ok(Self { conn })
    }

    /// Append a message; the store assigns id and created_at.
    pub fn send(&self, draft: &Draft) -> anyhow::Result<i64> {
        let payload = draft
            .payload
            .as_ref()
            .map(|v| serde_json::to_string(v))
            .transpose()
            .map_err(|e| ExitError::Mail(format!("encoding payload: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO messages
                    (sender, recipient, subject, body, msg_type, priority, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    draft.from,
                    draft.to,
                    draft.subject,
                    draft.body,
                    draft.msg_type.as_str(),
                    draft.priority.as_str(),
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| ExitError::Mail(format!("inserting message: {e}")))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Fetch one message by id.
    pub fn get(&self, id: i64) -> anyhow::Result<Message> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                row_to_message,
            )
            .optional()
            .map_err(|e| ExitError::Mail(format!("fetching message {id}: {e}")))?
            .ok_or_else(|| ExitError::Mail(format!("no message with id {id}")).into())
    }

    /// List messages newest-first, honoring the filter.
    pub fn list(&self, filter: &MailFilter) -> anyhow::Result<Vec<Message>> {
        let mut sql = format!("SELECT {COLUMNS} FROM messages WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(ref from) = filter.from {
            args.push(from.clone());
            sql.push_str(&format!(" AND sender = ?{}", args.len()));
        }
        if let Some(ref to) = filter.to {
            args.push(to.clone());
            sql.push_str(&format!(" AND recipient = ?{}", args.len()));
        }
        if filter.unread_only {
            sql.push_str(" AND read_at IS NULL");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| ExitError::Mail(format!("listing messages: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_message)
            .map_err(|e| ExitError::Mail(format!("listing messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(|e| ExitError::Mail(format!("decoding message row: {e}")))?);
        }
        Ok(messages)
    }

    /// Mark a message read. Idempotent: a second call reports AlreadyRead.
    pub fn mark_read(&self, id: i64) -> anyhow::Result<ReadOutcome> {
        let message = self.get(id)?;
        if message.read_at.is_some() {
            return Ok(ReadOutcome::AlreadyRead);
        }
        // Clamp so read_at never precedes created_at even under clock skew.
        let read_at = Utc::now().max(message.created_at);
        self.conn
            .execute(
                "UPDATE messages SET read_at = ?1 WHERE id = ?2",
                params![read_at.to_rfc3339(), id],
            )
            .map_err(|e| ExitError::Mail(format!("marking {id} read: {e}")))?;
        Ok(ReadOutcome::Marked)
    }

    /// Flip a message back to unread.
    pub fn mark_unread(&self, id: i64) -> anyhow::Result<()> {
        let changed = self
            .conn
            .execute("UPDATE messages SET read_at = NULL WHERE id = ?1", [id])
            .map_err(|e| ExitError::Mail(format!("marking {id} unread: {e}")))?;
        if changed == 0 {
            return Err(ExitError::Mail(format!("no message with id {id}")).into());
        }
        Ok(())
    }

    /// Reply to a message. The recipient is the original sender, unless the
    /// replier IS the original sender, in which case it goes back to the
    /// original recipient. Subject gains a single "Re: " prefix.
    pub fn reply(&self, original_id: i64, from: &str, body: &str) -> anyhow::Result<i64> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| ExitError::Mail(format!("starting transaction: {e}")))?;

        let original = self.get(original_id)?;
        let to = if from == original.from {
            original.to.clone()
        } else {
            original.from.clone()
        };
        let subject = if original.subject.starts_with("Re: ") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };

        tx.execute(
            "INSERT INTO messages
                (sender, recipient, subject, body, msg_type, priority, created_at, in_reply_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                from,
                to,
                subject,
                body,
                MessageType::Status.as_str(),
                Priority::Normal.as_str(),
                Utc::now().to_rfc3339(),
                original_id,
            ],
        )
        .map_err(|e| ExitError::Mail(format!("inserting reply: {e}")))?;

        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| ExitError::Mail(format!("committing reply: {e}")))?;
        Ok(id)
    }

    /// Count unread messages for a recipient.
    pub fn unread_count(&self, recipient: &str) -> anyhow::Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient = ?1 AND read_at IS NULL",
                [recipient],
                |row| row.get(0),
            )
            .map_err(|e| ExitError::Mail(format!("counting unread: {e}")))?;
        Ok(count as usize)
    }

    /// Timestamp of the most recent message sent by `name`, if any.
    pub fn last_activity(&self, name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(created_at) FROM messages WHERE sender = ?1",
                [name],
                |row| row.get(0),
            )
            .map_err(|e| ExitError::Mail(format!("querying last activity: {e}")))?;
        Ok(latest.and_then(|s| parse_timestamp(&s).ok()))
    }

    // Agent mirror table. The lifecycle manager is the only writer.

    pub fn upsert_agent(&self, record: &AgentRecord) -> anyhow::Result<()> {
        self.conn
            .execute(
                "INSERT INTO agents
                    (name, capability, task_id, parent, depth, branch, worktree, session_pid, spawned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(name) DO UPDATE SET
                    capability = excluded.capability,
                    task_id = excluded.task_id,
                    parent = excluded.parent,
                    depth = excluded.depth,
                    branch = excluded.branch,
                    worktree = excluded.worktree,
                    session_pid = excluded.session_pid,
                    spawned_at = excluded.spawned_at",
                params![
                    record.name,
                    record.capability.as_str(),
                    record.task_id,
                    record.parent,
                    record.depth,
                    record.branch,
                    record.worktree.to_string_lossy(),
                    record.session_pid,
                    record.spawned_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ExitError::Mail(format!("recording agent {}: {e}", record.name)))?;
        Ok(())
    }

    pub fn remove_agent(&self, name: &str) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM agents WHERE name = ?1", [name])
            .map_err(|e| ExitError::Mail(format!("removing agent {name}: {e}")))?;
        Ok(())
    }

    pub fn get_agent(&self, name: &str) -> anyhow::Result<Option<AgentRecord>> {
        self.conn
            .query_row(
                "SELECT name, capability, task_id, parent, depth, branch, worktree, session_pid, spawned_at
                 FROM agents WHERE name = ?1",
                [name],
                row_to_agent,
            )
            .optional()
            .map_err(|e| ExitError::Mail(format!("fetching agent {name}: {e}")).into())
    }

    pub fn list_agents(&self) -> anyhow::Result<Vec<AgentRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, capability, task_id, parent, depth, branch, worktree, session_pid, spawned_at
                 FROM agents ORDER BY name",
            )
            .map_err(|e| ExitError::Mail(format!("listing agents: {e}")))?;
        let rows = stmt
            .query_map([], row_to_agent)
            .map_err(|e| ExitError::Mail(format!("listing agents: {e}")))?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(row.map_err(|e| ExitError::Mail(format!("decoding agent row: {e}")))?);
        }
        Ok(agents)
    }
}

const COLUMNS: &str =
    "id, sender, recipient, subject, body, msg_type, priority, payload, created_at, read_at, in_reply_to";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let msg_type: String = row.get(5)?;
    let priority: String = row.get(6)?;
    let payload: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    let read_at: Option<String> = row.get(9)?;

    Ok(Message {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        subject: row.get(3)?,
        body: row.get(4)?,
        msg_type: MessageType::parse(&msg_type)
            .ok_or_else(|| conversion_error(5, &msg_type))?,
        priority: Priority::parse(&priority).ok_or_else(|| conversion_error(6, &priority))?,
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: parse_timestamp(&created_at).map_err(|_| conversion_error(8, &created_at))?,
        read_at: match read_at {
            Some(ts) => Some(parse_timestamp(&ts).map_err(|_| conversion_error(9, &ts))?),
            None => None,
        },
        in_reply_to: row.get(10)?,
    })
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
    let capability: String = row.get(1)?;
    let worktree: String = row.get(6)?;
    let spawned_at: String = row.get(8)?;

    Ok(AgentRecord {
        name: row.get(0)?,
        capability: Capability::parse(&capability)
            .ok_or_else(|| conversion_error(1, &capability))?,
        task_id: row.get(2)?,
        parent: row.get(3)?,
        depth: row.get(4)?,
        branch: row.get(5)?,
        worktree: worktree.into(),
        session_pid: row.get(7)?,
        spawned_at: parse_timestamp(&spawned_at).map_err(|_| conversion_error(8, &spawned_at))?,
    })
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn conversion_error(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("unexpected value {value:?}").into(),
    )
}
