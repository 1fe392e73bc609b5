use clap::Parser;
use tracing_subscriber::EnvFilter;

use sessionfeed::cli::handlers;
use sessionfeed::cli::{Cli, Commands};
use sessionfeed::{Config, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so listings on stdout stay clean
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sessionfeed=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List(args) => {
            let config = Config::load(cli.config.as_deref())?;
            handlers::list_sessions(config, args).await
        }
        Commands::Watch(args) => {
            let config = Config::load(cli.config.as_deref())?;
            handlers::watch_sessions(config, args).await
        }
        Commands::Config { command } => {
            handlers::handle_config_command(cli.config.as_deref(), command).await
        }
    }
}
