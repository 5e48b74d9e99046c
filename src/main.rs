use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use feedmill::config::Config;
use feedmill::storage::{Database, DatabaseError};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "feedmill", version, about = "Feed ingestion daemon and article store")]
struct Args {
    /// Config file (default: ~/.config/feedmill/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every feed until interrupted
    Run {
        /// Run a single ingestion cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Subscribe to a feed and ingest it once
    Add {
        url: String,
        /// Maximum items requested per fetch (default from config)
        #[arg(long)]
        size: Option<i64>,
        /// Register without enabling polling
        #[arg(long)]
        no_sync: bool,
        #[arg(long, value_name = "ID")]
        category: Option<i64>,
    },
    /// List subscribed feeds
    List,
    /// Change a feed's settings
    Update {
        id: i64,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        size: Option<i64>,
        /// Enable or disable polling
        #[arg(long)]
        sync: Option<bool>,
        #[arg(long, value_name = "ID", conflicts_with = "no_category")]
        category: Option<i64>,
        /// Clear the category
        #[arg(long)]
        no_category: bool,
    },
    /// Unsubscribe a feed and delete its articles
    Remove { id: i64 },
    /// List articles, newest first
    Articles {
        /// Only articles of this feed
        #[arg(long, value_name = "ID")]
        feed: Option<i64>,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show one article
    Article { id: i64 },
    /// Delete one article
    RemoveArticle { id: i64 },
    /// Full-text search over titles and descriptions
    Search {
        query: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Mark an article as read (or unread)
    Read {
        id: i64,
        #[arg(long)]
        unread: bool,
    },
    /// Article counts for a feed
    Stats { feed_id: i64 },
    /// Rebuild the full-text search index
    RebuildSearch,
}

/// Get the config directory path (~/.config/feedmill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmill"))
}

fn init_logging(level: &str) {
    // Base level from config, still overridable via RUST_LOG.
    let default = format!("{level},feedmill={level},sqlx=warn,reqwest=warn,html5ever=error");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env();
    config.validate()?;

    init_logging(&config.log_level);

    let db_path = config.database_path_in(&config_dir);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!("Database {} is locked by another process", db_path.display());
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let result = dispatch(&db, &config, args.command, args.json).await;
    db.close().await;
    result
}

async fn dispatch(db: &Database, config: &Config, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Run { once } => commands::run(db, config, once).await,
        Command::Add {
            url,
            size,
            no_sync,
            category,
        } => {
            let request = commands::AddRequest {
                url,
                size,
                sync: !no_sync,
                category,
            };
            commands::add(db, config, request, json).await
        }
        Command::List => commands::list(db, json).await,
        Command::Update {
            id,
            url,
            size,
            sync,
            category,
            no_category,
        } => {
            let request = commands::UpdateRequest {
                id,
                url,
                size,
                sync,
                category: if no_category {
                    Some(None)
                } else {
                    category.map(Some)
                },
            };
            commands::update(db, config, request, json).await
        }
        Command::Remove { id } => commands::remove(db, id).await,
        Command::Articles {
            feed,
            unread,
            limit,
        } => commands::articles(db, feed, unread, limit, json).await,
        Command::Article { id } => commands::article(db, id, json).await,
        Command::RemoveArticle { id } => commands::remove_article(db, id).await,
        Command::Search { query, limit } => commands::search(db, &query, limit, json).await,
        Command::Read { id, unread } => commands::mark_read(db, id, !unread).await,
        Command::Stats { feed_id } => commands::stats(db, feed_id, json).await,
        Command::RebuildSearch => commands::rebuild_search(db).await,
    }
}
