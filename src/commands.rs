//! CLI command handlers.
//!
//! Feed-supplied text is cleaned of control sequences before it reaches the
//! terminal. `--json` output is emitted as-is.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use feedmill::config::Config;
use feedmill::feed::HttpFetcher;
use feedmill::ingest::{run_cycle, subscribe, FeedStore, NewSubscription, Scheduler};
use feedmill::storage::{Article, ArticleQuery, Database, FeedSource, FeedUpdate};
use feedmill::util::{clean_for_terminal, display_width, truncate_to_width, validate_feed_url};

const TITLE_WIDTH: usize = 48;
const URL_WIDTH: usize = 56;
const DATE_WIDTH: usize = 31;

pub struct AddRequest {
    pub url: String,
    pub size: Option<i64>,
    pub sync: bool,
    pub category: Option<i64>,
}

pub struct UpdateRequest {
    pub id: i64,
    pub url: Option<String>,
    pub size: Option<i64>,
    pub sync: Option<bool>,
    pub category: Option<Option<i64>>,
}

fn fetcher(config: &Config) -> Result<HttpFetcher> {
    HttpFetcher::new(config.request_timeout(), config.max_feed_bytes)
        .context("Failed to create HTTP client")
}

// ============================================================================
// run
// ============================================================================

pub async fn run(db: &Database, config: &Config, once: bool) -> Result<()> {
    let fetcher = Arc::new(fetcher(config)?);
    let store: Arc<dyn FeedStore> = Arc::new(db.clone());

    if once {
        let summary = run_cycle(store.as_ref(), fetcher.as_ref()).await;
        println!(
            "Cycle complete: {} feeds, {} succeeded, {} failed, {} skipped, {} new articles",
            summary.feeds, summary.succeeded, summary.failed, summary.skipped, summary.inserted
        );
        return Ok(());
    }

    let handle = Scheduler::new(store, fetcher, config.poll_interval()).spawn();
    wait_for_shutdown().await?;

    tracing::info!("Waiting for the current cycle to finish");
    handle
        .stop()
        .await
        .context("Scheduler did not shut down cleanly")?;
    tracing::info!("Scheduler stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        biased;

        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down gracefully");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down gracefully");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received Ctrl-C, shutting down gracefully");
    Ok(())
}

// ============================================================================
// Feeds
// ============================================================================

pub async fn add(db: &Database, config: &Config, request: AddRequest, json: bool) -> Result<()> {
    let fetcher = fetcher(config)?;
    let proxy = config.proxy()?;

    let subscription = subscribe(
        db,
        &fetcher,
        &proxy,
        NewSubscription {
            url: request.url,
            feed_size: request.size.unwrap_or(config.default_feed_size),
            sync: request.sync,
            category_id: request.category,
            allow_private_hosts: config.allow_private_hosts,
        },
    )
    .await?;

    let feed = &subscription.feed;
    if json {
        let ingestion = match &subscription.ingestion {
            Ok(report) => serde_json::json!({
                "total": report.total,
                "inserted": report.inserted,
                "existing": report.existing,
                "skipped": report.skipped,
                "failed": report.failed,
            }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        return print_json(&serde_json::json!({
            "feed": feed,
            "created": subscription.created,
            "ingestion": ingestion,
        }));
    }

    let verb = if subscription.created {
        "Subscribed to"
    } else {
        "Already subscribed to"
    };
    println!("{} feed {}: {}", verb, feed.id, clean_for_terminal(display_title(feed)));
    match &subscription.ingestion {
        Ok(report) => println!(
            "Fetched {} items: {} new, {} already stored",
            report.total, report.inserted, report.existing
        ),
        Err(e) => eprintln!("Warning: first fetch failed: {}", e),
    }
    Ok(())
}

pub async fn list(db: &Database, json: bool) -> Result<()> {
    let feeds = db.list_feeds().await.context("Failed to list feeds")?;
    if json {
        return print_json(&feeds);
    }
    if feeds.is_empty() {
        println!("No feeds. Add one with: feedmill add <URL>");
        return Ok(());
    }

    println!(
        "{:>5}  {:<4}  {:>4}  {}  {}",
        "ID",
        "SYNC",
        "SIZE",
        cell("TITLE", TITLE_WIDTH),
        "URL"
    );
    for feed in &feeds {
        println!(
            "{:>5}  {:<4}  {:>4}  {}  {}",
            feed.id,
            if feed.sync { "on" } else { "off" },
            feed.feed_size,
            cell(display_title(feed), TITLE_WIDTH),
            truncate_to_width(&clean_for_terminal(&feed.url), URL_WIDTH)
        );
    }
    Ok(())
}

pub async fn update(
    db: &Database,
    config: &Config,
    request: UpdateRequest,
    json: bool,
) -> Result<()> {
    if let Some(size) = request.size {
        anyhow::ensure!(size >= 1, "Feed size must be at least 1, got {}", size);
    }
    let url = match request.url {
        Some(url) => Some(validate_feed_url(&url, config.allow_private_hosts)?.to_string()),
        None => None,
    };
    let update = FeedUpdate {
        url,
        feed_size: request.size,
        sync: request.sync,
        category_id: request.category,
    };
    anyhow::ensure!(!update.is_empty(), "Nothing to update");

    let proxy = config.proxy()?;
    let feed = db
        .update_feed(request.id, &update, |url, size| proxy.resolve(url, size))
        .await
        .with_context(|| format!("Failed to update feed {}", request.id))?
        .ok_or_else(|| anyhow::anyhow!("No feed with id {}", request.id))?;

    if json {
        return print_json(&feed);
    }
    println!("Updated feed {}: fetching {}", feed.id, feed.fetch_url);
    Ok(())
}

pub async fn remove(db: &Database, id: i64) -> Result<()> {
    let removed = db
        .delete_feed(id)
        .await
        .with_context(|| format!("Failed to delete feed {}", id))?;
    anyhow::ensure!(removed, "No feed with id {}", id);
    println!("Removed feed {} and its articles", id);
    Ok(())
}

pub async fn stats(db: &Database, feed_id: i64, json: bool) -> Result<()> {
    let stats = db
        .feed_stats(feed_id)
        .await
        .context("Failed to load feed stats")?
        .ok_or_else(|| anyhow::anyhow!("No feed with id {}", feed_id))?;
    if json {
        return print_json(&stats);
    }

    println!("Feed {}", stats.feed_id);
    println!("  Articles: {}", stats.total_articles);
    println!("  Unread:   {}", stats.unread_articles);
    let last = stats
        .last_ingested_at
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!("  Last new article: {}", last);
    Ok(())
}

// ============================================================================
// Articles
// ============================================================================

pub async fn articles(
    db: &Database,
    feed_id: Option<i64>,
    unread_only: bool,
    limit: Option<i64>,
    json: bool,
) -> Result<()> {
    let articles = db
        .list_articles(&ArticleQuery {
            feed_id,
            unread_only,
            limit,
        })
        .await
        .context("Failed to list articles")?;
    if json {
        return print_json(&articles);
    }
    print_articles(&articles);
    Ok(())
}

pub async fn article(db: &Database, id: i64, json: bool) -> Result<()> {
    let article = db
        .get_article(id)
        .await
        .context("Failed to load article")?
        .ok_or_else(|| anyhow::anyhow!("No article with id {}", id))?;
    if json {
        return print_json(&article);
    }

    println!("{}", clean_for_terminal(&article.title));
    println!("Link:      {}", clean_for_terminal(&article.link));
    println!("Published: {}", clean_for_terminal(&article.publish_date));
    println!("Feed:      {}", article.feed_id);
    println!("Status:    {}", if article.read { "read" } else { "unread" });
    if !article.description.is_empty() {
        println!();
        println!("{}", clean_for_terminal(&article.description));
    }
    Ok(())
}

pub async fn remove_article(db: &Database, id: i64) -> Result<()> {
    let removed = db
        .delete_article(id)
        .await
        .with_context(|| format!("Failed to delete article {}", id))?;
    anyhow::ensure!(removed, "No article with id {}", id);
    println!("Removed article {}", id);
    Ok(())
}

pub async fn mark_read(db: &Database, id: i64, read: bool) -> Result<()> {
    let article = db
        .set_article_read(id, read)
        .await
        .context("Failed to update article")?
        .ok_or_else(|| anyhow::anyhow!("No article with id {}", id))?;
    println!(
        "Marked article {} as {}",
        article.id,
        if article.read { "read" } else { "unread" }
    );
    Ok(())
}

pub async fn search(db: &Database, query: &str, limit: Option<i64>, json: bool) -> Result<()> {
    let results = db
        .search_articles(query, limit)
        .await
        .context("Search failed")?;
    if json {
        return print_json(&results);
    }
    if results.is_empty() {
        println!("No matches for {:?}", query);
        return Ok(());
    }
    print_articles(&results);
    Ok(())
}

pub async fn rebuild_search(db: &Database) -> Result<()> {
    tracing::info!("Rebuilding search index...");
    let count = db
        .rebuild_search_index()
        .await
        .context("Failed to rebuild search index")?;
    tracing::info!(articles = count, "Search index rebuilt");
    println!("Search index rebuilt: {} articles indexed", count);
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

fn print_articles(articles: &[Article]) {
    if articles.is_empty() {
        println!("No articles");
        return;
    }
    for article in articles {
        println!(
            "{:>6} {} {}  {}",
            article.id,
            if article.read { " " } else { "*" },
            cell(&article.publish_date, DATE_WIDTH),
            truncate_to_width(&clean_for_terminal(&article.title), TITLE_WIDTH + URL_WIDTH)
        );
    }
}

fn display_title(feed: &FeedSource) -> &str {
    if feed.title.is_empty() {
        &feed.url
    } else {
        &feed.title
    }
}

/// Fixed-width table cell: cleaned, truncated and padded to `width` columns.
fn cell(text: &str, width: usize) -> String {
    let clean = clean_for_terminal(text);
    let cut = truncate_to_width(&clean, width);
    let pad = width.saturating_sub(display_width(&cut));
    format!("{}{}", cut, " ".repeat(pad))
}
