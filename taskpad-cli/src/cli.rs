//! Command-line arguments

use clap::Parser;

/// Taskpad - personal to-do list in the terminal
#[derive(Debug, Parser)]
#[command(
    name = "taskpad",
    about = "Personal to-do list backed by a hosted auth + data service",
    version,
    after_help = "Backend settings are read from TASKPAD_BACKEND_URL and \
                  TASKPAD_BACKEND_ANON_KEY (a .env file is loaded if present). \
                  The signed-in session is kept in TASKPAD_BACKEND_SESSION_FILE \
                  or the platform config directory."
)]
pub struct Cli {
    /// Run against an in-process backend instead of the hosted service
    #[arg(long)]
    pub offline: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "taskpad=debug,taskpad_shared=debug"
        } else {
            "taskpad=warn,taskpad_shared=warn"
        }
    }
}
