use anyhow::Context;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use crate::cli::{ConfigCommands, ViewArgs};
use crate::client::{DataApiClient, RealtimeClient};
use crate::feed::{ChangeChannel, FeedError, FeedSnapshot, NullChannel, SessionFeed};
use crate::utils::display::{format_session_row, format_summary};
use crate::{Config, Result};

pub async fn list_sessions(config: Config, args: ViewArgs) -> Result<()> {
    let source = Arc::new(DataApiClient::from_config(&config)?);
    ensure_backend_reachable(&source, &config).await?;
    let feed = SessionFeed::new(source, Arc::new(NullChannel::default()));
    apply_view_args(&feed, &args);

    let result = feed.initialize(&args.tenant).await;
    feed.dispose().await;
    result.with_context(|| format!("Failed to list sessions of tenant {}", args.tenant))?;

    print_snapshot(&feed.snapshot());
    Ok(())
}

pub async fn watch_sessions(config: Config, args: ViewArgs) -> Result<()> {
    let source = Arc::new(DataApiClient::from_config(&config)?);
    ensure_backend_reachable(&source, &config).await?;
    let channel: Arc<dyn ChangeChannel> = Arc::new(RealtimeClient::from_config(&config)?);
    let feed = SessionFeed::new(source, channel);
    apply_view_args(&feed, &args);

    tracing::info!("Watching sessions of tenant {}", args.tenant);
    if let Err(e) = feed.initialize(&args.tenant).await {
        feed.dispose().await;
        return Err(e).with_context(|| format!("Failed to watch tenant {}", args.tenant));
    }

    let mut updates = feed.updates();
    print_snapshot(&updates.borrow_and_update());

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                // Skip the intermediate "refresh started" publication
                if !snapshot.is_refreshing {
                    print_snapshot(&snapshot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    feed.dispose().await;
    Ok(())
}

pub async fn handle_config_command(
    config_path: Option<&Path>,
    command: ConfigCommands,
) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = match config_path {
                Some(path) => path.to_path_buf(),
                None => Config::default_path().ok_or_else(|| {
                    anyhow::anyhow!("No config directory available on this platform")
                })?,
            };
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file {} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
            println!("💡 Set backend.url and backend.anon_key before running list or watch");
        }
        ConfigCommands::Show => {
            let config = Config::load(config_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Path => match Config::default_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("❌ No config directory available on this platform"),
        },
    }
    Ok(())
}

async fn ensure_backend_reachable(client: &DataApiClient, config: &Config) -> Result<()> {
    if !client.is_reachable().await {
        println!("❌ Backend at {} is not reachable", config.backend.url);
        println!("💡 Check backend.url with: sessionfeed config show");
        anyhow::bail!("Backend at {} is not reachable", config.backend.url);
    }
    Ok(())
}

fn apply_view_args(feed: &SessionFeed, args: &ViewArgs) {
    feed.set_filter(args.status);
    if let Some(search) = &args.search {
        feed.set_search_text(search.clone());
    }
}

fn print_snapshot(snapshot: &FeedSnapshot) {
    let now = Utc::now();
    let visible = snapshot.visible_items();

    println!(
        "\n📋 Sessions of {} (filter: {}{})",
        snapshot.tenant_id.as_deref().unwrap_or("?"),
        snapshot.filter,
        if snapshot.search_text.is_empty() {
            String::new()
        } else {
            format!(", search: \"{}\"", snapshot.search_text)
        }
    );
    println!("   {}", format_summary(&snapshot.summary()));

    match &snapshot.last_error {
        Some(FeedError::Subscribe(error)) => {
            println!("⚠️  Live updates unavailable: {} (showing cached sessions)", error);
        }
        Some(error) => println!("⚠️  Last refresh failed: {} (showing cached sessions)", error),
        None => {}
    }

    if visible.is_empty() {
        println!("   No matching sessions");
        return;
    }
    for session in &visible {
        println!("   {}", format_session_row(session, now));
    }
}
