use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::SessionFilter;

#[derive(Parser, Debug)]
#[command(name = "sessionfeed")]
#[command(about = "Live view of a tenant's WhatsApp conversation sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch and print a tenant's sessions once
    List(ViewArgs),
    /// Print a tenant's sessions and keep them updated until Ctrl-C
    Watch(ViewArgs),
    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// Tenant (company) ID
    pub tenant: String,
    /// Status filter: all, active or closed
    #[arg(short, long, default_value = "all")]
    pub status: SessionFilter,
    /// Case-insensitive match on customer name or phone
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the default config file location
    Path,
}
