//! Tracing setup for the CLI.
//!
//! Filtering is controlled by `OVERSTORY_LOG` (standard env-filter syntax,
//! e.g. `overstory=debug`). Events go to stderr so command output on stdout
//! stays machine-readable.

use tracing_subscriber::{fmt, EnvFilter};

/// Guard returned by [`init`]; keep it alive for the process lifetime.
pub struct Telemetry;

/// Initialize the global tracing subscriber. Safe to call once from main.
pub fn init() -> Telemetry {
    let filter = EnvFilter::try_from_env("OVERSTORY_LOG")
        .unwrap_or_else(|_| EnvFilter::new("overstory=warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();

    Telemetry
}
