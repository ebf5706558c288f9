//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// juiced - a headless bot for a channel
#[derive(Debug, Parser)]
#[command(name = "juiced")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (.toml or .json)
    #[arg(long, short, env = "JUICED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log as JSON lines instead of plain text
    #[arg(long)]
    pub json_logs: bool,

    // --- Connection overrides ---
    /// Site hosting the channel
    #[arg(long)]
    pub domain: Option<String>,

    /// Channel to join
    #[arg(long)]
    pub channel: Option<String>,

    /// Account name
    #[arg(long, env = "JUICED_USER")]
    pub user: Option<String>,

    /// SOCKS5 proxy as host[:port]
    #[arg(long, env = "JUICED_PROXY")]
    pub proxy: Option<String>,

    /// SQLite database path
    #[arg(long, env = "JUICED_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Join the channel and print chat and presence until interrupted (default)
    Run {
        /// Exit on the first connection loss instead of reconnecting
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Queue a chat message for the running bot to deliver
    Queue {
        /// Message text
        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Show the last room status recorded by the bot
    Status,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
