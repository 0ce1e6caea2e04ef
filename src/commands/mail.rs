//! `overstory mail` — send, list, read, reply, and the hook-facing check.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::error::ExitError;
use crate::mail::store::ReadOutcome;
use crate::mail::{Draft, MailFilter, Message, MessageType, Priority};

use super::Workspace;

#[derive(Debug, Subcommand)]
pub enum MailCommand {
    /// Send a message to an agent (or the orchestrator)
    Send(SendArgs),
    /// List messages, newest first
    List(ListArgs),
    /// Show a message and mark it read
    Read(ReadArgs),
    /// Reply to a message; the recipient is derived from the original
    Reply(ReplyArgs),
    /// Hook entry point: emit injection text for an agent's next prompt
    Check(CheckArgs),
}

impl MailCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            MailCommand::Send(args) => args.execute(),
            MailCommand::List(args) => args.execute(),
            MailCommand::Read(args) => args.execute(),
            MailCommand::Reply(args) => args.execute(),
            MailCommand::Check(args) => args.execute(),
        }
    }
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Recipient agent name
    #[arg(long)]
    pub to: String,
    /// Sender name
    #[arg(long, default_value = crate::mail::ORCHESTRATOR)]
    pub from: String,
    #[arg(long)]
    pub subject: String,
    #[arg(long)]
    pub body: String,
    #[arg(long, value_enum, default_value_t = MessageType::Status)]
    pub r#type: MessageType,
    #[arg(long, value_enum, default_value_t = Priority::Normal)]
    pub priority: Priority,
    /// Structured payload for protocol messages (raw JSON)
    #[arg(long)]
    pub payload: Option<String>,
    /// Print the assigned message id as JSON
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl SendArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let client = workspace.mail_client()?;

        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ExitError::Validation(format!("invalid --payload JSON: {e}")))?;

        let mut draft = Draft::new(&self.from, &self.to, &self.subject, &self.body)
            .msg_type(self.r#type)
            .priority(self.priority);
        draft.payload = payload;

        let id = client.send(&draft)?;
        if self.json {
            println!("{}", serde_json::json!({ "id": id }));
        } else {
            println!("Sent message #{id} to {}", self.to);
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Filter by recipient (wins over --agent when both are given)
    #[arg(long)]
    pub to: Option<String>,
    /// Alias for --to
    #[arg(long)]
    pub agent: Option<String>,
    /// Filter by sender
    #[arg(long)]
    pub from: Option<String>,
    /// Only unread messages
    #[arg(long)]
    pub unread: bool,
    #[arg(long)]
    pub limit: Option<usize>,
    /// Emit JSON instead of the text listing
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl ListArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let client = workspace.mail_client()?;

        let messages = client.list(&MailFilter {
            from: self.from.clone(),
            to: self.to.clone().or_else(|| self.agent.clone()),
            unread_only: self.unread,
            limit: self.limit,
        })?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&messages)?);
            return Ok(());
        }
        if messages.is_empty() {
            println!("No messages");
            return Ok(());
        }
        for message in &messages {
            print_summary(message);
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Message id
    pub id: i64,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl ReadArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let client = workspace.mail_client()?;

        let outcome = client.mark_read(self.id)?;
        let message = client.get(self.id)?;
        print_full(&message);
        if outcome == ReadOutcome::AlreadyRead {
            println!("(already read)");
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ReplyArgs {
    /// Id of the message being answered
    pub id: i64,
    #[arg(long)]
    pub body: String,
    /// Replying agent
    #[arg(long, default_value = crate::mail::ORCHESTRATOR)]
    pub agent: String,
    #[arg(long)]
    pub json: bool,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl ReplyArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let client = workspace.mail_client()?;

        let id = client.reply(self.id, &self.agent, &self.body)?;
        if self.json {
            println!("{}", serde_json::json!({ "id": id }));
        } else {
            println!("Sent reply #{id}");
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Agent whose mailbox is being checked
    #[arg(long)]
    pub agent: String,
    /// Emit the injection text and drain the pending-nudge marker
    #[arg(long)]
    pub inject: bool,
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
}

impl CheckArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let workspace = Workspace::resolve(self.repo_root.as_deref())?;
        let client = workspace.mail_client()?;

        if self.inject {
            // Empty output is meaningful: nothing pending, nothing printed.
            print!("{}", client.check_inject(&self.agent)?);
        } else {
            let unread = client.store().unread_count(&self.agent)?;
            println!("{unread} unread message(s) for {}", self.agent);
        }
        Ok(())
    }
}

fn print_summary(message: &Message) {
    let read = if message.is_unread() { "unread" } else { "read" };
    println!(
        "#{} {} -> {} [{}/{}] {} ({})",
        message.id,
        message.from,
        message.to,
        message.msg_type.as_str(),
        message.priority.as_str(),
        message.subject,
        read,
    );
}

fn print_full(message: &Message) {
    println!("Message #{}", message.id);
    println!("From:     {}", message.from);
    println!("To:       {}", message.to);
    println!("Subject:  {}", message.subject);
    println!("Type:     {}", message.msg_type.as_str());
    println!("Priority: {}", message.priority.as_str());
    println!("Sent:     {}", message.created_at.to_rfc3339());
    if let Some(parent) = message.in_reply_to {
        println!("In-reply-to: #{parent}");
    }
    println!("\n{}", message.body);
}
