//! Clap derive structures for the `doorlink` CLI.

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// doorlink -- operator-side tooling for intercom controller links
#[derive(Debug, Parser)]
#[command(
    name = "doorlink",
    version,
    about = "Inspect doorlink configuration and exercise the reconciliation engine",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Controller profile to use
    #[arg(long, short = 'p', env = "DOORLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect and edit the configuration file
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Run the engine against an in-process controller and print every bus event
    #[command(alias = "sim")]
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display the resolved profile (secrets redacted)
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a password in the system keyring (read from stdin)
    SetPassword,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Print events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,

    /// Restart attempts before the simulated link gives up
    #[arg(long, default_value = "3")]
    pub reconnect_attempts: u32,
}
