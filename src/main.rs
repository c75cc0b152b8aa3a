use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use braid::config::Config;
use braid::feed::{
    AssetMetadataCache, FeedCommand, FeedEngine, FeedFilter, FeedItem,
    FeedSession, FeedUpdate, ItemTag, ListViewport, Normalizer, Payload,
};
use braid::source::http::{HttpAuctionSource, HttpForumSource};
use braid::storage::{Database, DatabaseError, FeedStore, KeyValueStore};

/// Headless viewport geometry: one item per row.
const VIEWPORT_HEIGHT: f64 = 2_000.0;
const ROW_HEIGHT: f64 = 100.0;

/// Get the config directory path (~/.config/braid/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("braid"))
}

#[derive(Parser, Debug)]
#[command(name = "braid", about = "Merged forum and auction activity feed")]
struct Args {
    /// Config file (default: ~/.config/braid/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/braid/braid.db)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Start the feed at this forum item instead of the top
    #[arg(long, value_name = "ID")]
    start_from: Option<u64>,

    /// Free-text search
    #[arg(long)]
    search: Option<String>,

    /// Only items by this creator
    #[arg(long, value_name = "ID")]
    creator: Option<String>,

    /// Only items under this root (repeatable; remembered between runs)
    #[arg(long = "root", value_name = "ID")]
    roots: Vec<String>,

    /// Only items of this type: post, reply, poll, repost (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<ItemTag>,

    /// Hide auction offers
    #[arg(long)]
    no_auctions: bool,

    /// Older pages to load after the first one
    #[arg(long, value_name = "N", default_value_t = 0)]
    pages: usize,

    /// Keep polling for new items until Ctrl-C
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args.db.clone().unwrap_or_else(|| config_dir.join("braid.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of braid appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    db.begin_session()
        .await
        .context("Failed to reset session state")?;

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")?;
    let policy = config.retry_policy();
    let forum = HttpForumSource::new(
        client.clone(),
        config.forum_endpoint()?,
        config.api_token(),
        policy,
    );
    let auction = HttpAuctionSource::new(
        client,
        config.auction_endpoint()?,
        config.api_token(),
        policy,
    );

    let filter = FeedFilter {
        search: args.search.clone(),
        creator: args.creator.clone(),
        roots: args.roots.iter().cloned().collect(),
        tags: args.tags.iter().copied().collect(),
        show_auctions: config.show_auctions && !args.no_auctions,
    };

    let kv: Arc<dyn KeyValueStore> = Arc::new(db);
    let engine = FeedEngine::new(
        FeedStore::new(kv, &config.profile),
        Normalizer::new(Arc::new(AssetMetadataCache::default())),
        config.engine_options(),
    )
    .with_filter(filter);

    let mut session = FeedSession::new(
        engine,
        Arc::new(forum),
        Arc::new(auction),
        ListViewport::new(VIEWPORT_HEIGHT, ROW_HEIGHT),
        config.session_options(),
    );

    let (update_tx, update_rx) = mpsc::channel(16);
    if args.watch {
        session = session.with_updates(update_tx);
        tokio::spawn(print_updates(update_rx));
    }

    session.start(args.start_from).await;
    session.wait_idle().await;
    for _ in 0..args.pages {
        session.handle_command(FeedCommand::LoadOlder).await;
        session.wait_idle().await;
    }

    let items = session.engine().visible_items();
    if items.is_empty() {
        println!("No items.");
    }
    for item in &items {
        println!("{}", format_item(item));
    }

    if !args.watch {
        return Ok(());
    }

    println!("Watching for new items (Ctrl-C to stop)...");
    let (commands, command_rx) = mpsc::channel(8);
    let runner = tokio::spawn(async move {
        session.run(command_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received SIGINT, shutting down gracefully");
    if commands.send(FeedCommand::Shutdown).await.is_err() {
        tracing::debug!("Session already stopped");
    }
    runner.await.context("Feed session task failed")?;

    Ok(())
}

async fn print_updates(mut updates: mpsc::Receiver<FeedUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            FeedUpdate::NewItemsAvailable(count) => println!("-- {count} new items --"),
            FeedUpdate::LoadFailed { direction, error } => {
                eprintln!("Warning: {direction:?} load failed: {error}");
            }
            _ => {}
        }
    }
}

fn format_item(item: &FeedItem) -> String {
    let when = i64::try_from(item.created_at)
        .ok()
        .filter(|nanos| *nanos > 0)
        .map(|nanos| Utc.timestamp_nanos(nanos).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "----------------".to_string());

    match &item.payload {
        Payload::Forum(p) => format!(
            "{when}  {:<14} {:<6} {}",
            item.id.to_string(),
            p.tag.as_str(),
            p.title
        ),
        Payload::Auction(p) => {
            let price = match (&p.price, &p.price_token) {
                (Some(price), Some(token)) => format!(" [{price} {token}]"),
                (Some(price), None) => format!(" [{price}]"),
                _ => String::new(),
            };
            format!(
                "{when}  {:<14} {:<6} {}{price}",
                item.id.to_string(),
                "offer",
                p.title
            )
        }
    }
}
