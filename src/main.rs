use std::process::ExitCode;

use clap::{Parser, Subcommand};

use overstory::commands::mail::MailCommand;
use overstory::commands::merge::MergeArgs;
use overstory::commands::sling::SlingArgs;
use overstory::commands::status::StatusArgs;
use overstory::commands::teardown::TeardownArgs;
use overstory::commands::watch::WatchArgs;
use overstory::{error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "overstory",
    version,
    about = "Swarm orchestrator for coding-assistant workers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Spawn a worker agent into an isolated checkout and session
    Sling(SlingArgs),
    /// Send, list, read, reply, and check mailbox messages
    Mail {
        #[command(subcommand)]
        command: MailCommand,
    },
    /// Drain the merge queue against the canonical branch
    Merge(MergeArgs),
    /// Run the watchdog health scanner
    Watch(WatchArgs),
    /// Show live agents and pending work
    Status(StatusArgs),
    /// Tear down an agent (session, worktree, roster entry)
    Teardown(TeardownArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Sling(_) => "sling",
            Self::Mail { .. } => "mail",
            Self::Merge(_) => "merge",
            Self::Watch(_) => "watch",
            Self::Status(_) => "status",
            Self::Teardown(_) => "teardown",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Sling(args) => args.execute(),
        Commands::Mail { command } => command.execute(),
        Commands::Merge(args) => args.execute(),
        Commands::Watch(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Teardown(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
