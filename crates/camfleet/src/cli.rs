//! Clap derive structures for the `camfleet` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// camfleet -- inspect the configuration of the camera fleet agent
#[derive(Debug, Parser)]
#[command(
    name = "camfleet",
    version,
    about = "Camera fleet agent tooling",
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
    /// Agent configuration file (.json or .toml)
    #[arg(long, short = 'c', env = "CAMFLEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Aligned plain text
    Text,
    /// Pretty-printed JSON
    Json,
    /// TOML, as it would be written in a config file
    Toml,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the effective configuration (passwords redacted)
    Config(ConfigArgs),

    /// List system interfaces and whether discovery would sweep them
    #[command(alias = "itf")]
    Interfaces(InterfacesArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Output format (json or toml)
    #[arg(long, short = 'o', default_value = "json")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct InterfacesArgs {
    /// Output format (text or json)
    #[arg(long, short = 'o', default_value = "text")]
    pub output: OutputFormat,

    /// Directory listing the interfaces
    #[arg(long, default_value = "/sys/class/net", hide = true)]
    pub sysfs: PathBuf,
}
