//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "upsguard",
    version,
    about = "UPS monitoring daemon with staged shutdown orchestration"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        long,
        short = 'c',
        global = true,
        default_value = "/etc/upsguard/config.toml"
    )]
    pub config: PathBuf,

    /// Log intended actions instead of executing them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Exit once the shutdown sequence completes instead of waiting
    /// for the host to power off (used by tests)
    #[arg(long, global = true)]
    pub exit_after_shutdown: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Monitor the UPS (default)
    Run,
    /// Parse and validate the configuration, then exit 0/1
    ValidateConfig,
    /// Enqueue a probe notification and wait for delivery
    TestNotifications,
}
