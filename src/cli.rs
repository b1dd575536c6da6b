//! Command-line interface for vpnns
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// vpnns - network namespace routed through a WireGuard tunnel
#[derive(Parser, Debug)]
#[command(name = "vpnns")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (defaults apply when absent)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the namespace and route it through the tunnel
    Start {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Tear the namespace down
    Stop {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,
    },

    /// Show namespace and tunnel status
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration
    Check,

    /// Generate shell completions
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "vpnns", &mut std::io::stdout());
    }
}

/// Exit status for a parse failure
///
/// Help and version requests succeed; anything else is a usage error.
pub fn parse_exit_code(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
