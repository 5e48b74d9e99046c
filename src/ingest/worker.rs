use std::time::Instant;
use thiserror::Error;

use super::{FeedFetcher, FeedStore};
use crate::content::sanitize;
use crate::feed::{parse_feed, FetchError, FullTextProxy, ParseError, ParsedItem};
use crate::storage::{Database, DatabaseError, FeedSource, NewArticle, NewFeed};
use crate::util::{catch_task_panic, validate_feed_url, UrlValidationError};

/// Why ingesting a feed failed.
///
/// `Fetch` and `Parse` abort the feed before anything is written.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to parse feed: {0}")]
    Parse(#[from] ParseError),
    /// The store rejected every item of the document
    #[error("Failed to store articles: {0}")]
    Store(#[from] DatabaseError),
    /// A panic inside per-feed processing, caught at the feed boundary
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// Counters for one feed's ingestion.
///
/// `total == inserted + existing + skipped + failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub feed_id: i64,
    /// Items in the document
    pub total: usize,
    /// Newly stored articles
    pub inserted: usize,
    /// Items whose (feed, link) was already stored
    pub existing: usize,
    /// Items without a link
    pub skipped: usize,
    /// Items the store refused
    pub failed: usize,
}

/// Result of an ingestion plus the channel metadata of the fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingestion {
    pub report: IngestReport,
    pub title: String,
    pub description: String,
}

/// How one feed's run within a cycle ended.
#[derive(Debug)]
pub enum FeedOutcome {
    Ingested(IngestReport),
    Failed(IngestError),
    Panicked(String),
}

/// Fetch, parse and store one feed.
///
/// Items are stored in document order with sanitized descriptions. Links that
/// are already stored for the feed are left untouched, so the read flag of an
/// existing article never changes here.
pub async fn ingest_feed(
    store: &dyn FeedStore,
    fetcher: &dyn FeedFetcher,
    feed: &FeedSource,
) -> Result<IngestReport, IngestError> {
    ingest(store, fetcher, feed).await.map(|i| i.report)
}

/// [`ingest_feed`] inside the fault boundary. Never fails; the outcome is logged.
pub async fn run_feed(
    store: &dyn FeedStore,
    fetcher: &dyn FeedFetcher,
    feed: &FeedSource,
) -> FeedOutcome {
    match catch_task_panic(ingest_feed(store, fetcher, feed)).await {
        Ok(Ok(report)) => {
            tracing::info!(
                feed_id = feed.id,
                total = report.total,
                inserted = report.inserted,
                existing = report.existing,
                skipped = report.skipped,
                failed = report.failed,
                "Feed ingested"
            );
            FeedOutcome::Ingested(report)
        }
        Ok(Err(e)) => {
            tracing::warn!(feed_id = feed.id, url = %feed.fetch_url, error = %e, "Feed ingestion failed");
            FeedOutcome::Failed(e)
        }
        Err(panic_msg) => {
            tracing::error!(feed_id = feed.id, url = %feed.fetch_url, error = %panic_msg, "Feed ingestion panicked");
            FeedOutcome::Panicked(panic_msg)
        }
    }
}

/// Ingest a single feed on demand, reporting failure to the caller.
///
/// A panic is caught and returned as [`IngestError::Unexpected`].
pub async fn trigger_ingestion(
    store: &dyn FeedStore,
    fetcher: &dyn FeedFetcher,
    feed: &FeedSource,
) -> Result<Ingestion, IngestError> {
    catch_task_panic(ingest(store, fetcher, feed))
        .await
        .unwrap_or_else(|panic_msg| Err(IngestError::Unexpected(panic_msg)))
}

async fn ingest(
    store: &dyn FeedStore,
    fetcher: &dyn FeedFetcher,
    feed: &FeedSource,
) -> Result<Ingestion, IngestError> {
    let started = Instant::now();
    let body = fetcher.fetch(&feed.fetch_url).await?;
    let parsed = parse_feed(&body)?;

    let mut report = IngestReport {
        feed_id: feed.id,
        total: parsed.items.len(),
        ..Default::default()
    };
    let mut last_error = None;

    for item in parsed.items {
        if item.link.is_empty() {
            tracing::warn!(feed_id = feed.id, title = %item.title, "Skipping item without link");
            report.skipped += 1;
            continue;
        }

        let article = to_article(item);
        match store.upsert_article(feed.id, &article).await {
            Ok((_, true)) => report.existing += 1,
            Ok((_, false)) => report.inserted += 1,
            Err(e) => {
                tracing::warn!(feed_id = feed.id, link = %article.link, error = %e, "Failed to store article");
                report.failed += 1;
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error {
        if report.inserted == 0 && report.existing == 0 {
            return Err(IngestError::Store(e));
        }
    }

    tracing::debug!(
        feed_id = feed.id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Feed document processed"
    );
    Ok(Ingestion {
        report,
        title: parsed.title,
        description: parsed.description,
    })
}

fn to_article(item: ParsedItem) -> NewArticle {
    NewArticle {
        description: sanitize(&item.description),
        title: item.title,
        link: item.link,
        guid: item.guid,
        publish_date: item.pub_date,
        format: item.format,
        identifier: item.identifier,
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A request to subscribe to a feed.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Origin URL of the feed
    pub url: String,
    pub feed_size: i64,
    pub sync: bool,
    pub category_id: Option<i64>,
    /// Skip the private/loopback address check
    pub allow_private_hosts: bool,
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Feed size must be at least 1, got {0}")]
    InvalidFeedSize(i64),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// A stored subscription and the result of its first ingestion.
///
/// The feed row exists even when `ingestion` is an error.
#[derive(Debug)]
pub struct Subscription {
    pub feed: FeedSource,
    /// `false` when the URL was already subscribed
    pub created: bool,
    pub ingestion: Result<IngestReport, IngestError>,
}

/// Register a feed and ingest it once.
///
/// On a successful ingestion the feed's title and description are taken from
/// the channel.
pub async fn subscribe(
    db: &Database,
    fetcher: &dyn FeedFetcher,
    proxy: &FullTextProxy,
    request: NewSubscription,
) -> Result<Subscription, SubscribeError> {
    if request.feed_size < 1 {
        return Err(SubscribeError::InvalidFeedSize(request.feed_size));
    }
    let origin = validate_feed_url(&request.url, request.allow_private_hosts)?.to_string();

    let (feed, existed) = db
        .create_feed(&NewFeed {
            fetch_url: proxy.resolve(&origin, request.feed_size),
            url: origin,
            feed_size: request.feed_size,
            sync: request.sync,
            category_id: request.category_id,
        })
        .await?;
    if existed {
        tracing::info!(feed_id = feed.id, url = %feed.url, "Feed already subscribed");
    } else {
        tracing::info!(feed_id = feed.id, url = %feed.url, fetch_url = %feed.fetch_url, "Feed subscribed");
    }

    // From here on the row exists, so store errors are logged, not returned
    let ingestion = match trigger_ingestion(db, fetcher, &feed).await {
        Ok(ingestion) => {
            if let Err(e) = db
                .set_feed_metadata(feed.id, &ingestion.title, &ingestion.description)
                .await
            {
                tracing::warn!(feed_id = feed.id, error = %e, "Failed to store feed metadata");
            }
            Ok(ingestion.report)
        }
        Err(e) => {
            tracing::warn!(feed_id = feed.id, error = %e, "Initial ingestion failed");
            Err(e)
        }
    };

    let feed = match db.get_feed(feed.id).await {
        Ok(Some(stored)) => stored,
        Ok(None) => feed,
        Err(e) => {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to reload feed");
            feed
        }
    };
    Ok(Subscription {
        feed,
        created: !existed,
        ingestion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::{feed, MemoryStore, StubFetcher, TWO_ITEMS};
    use crate::storage::ArticleQuery;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_ingest_stores_items_in_order() {
        let store = MemoryStore::default();
        let fetcher = StubFetcher::with("https://example.com/rss", TWO_ITEMS);

        let report = ingest_feed(&store, &fetcher, &feed(1, "https://example.com/rss"))
            .await
            .unwrap();
        assert_eq!(
            report,
            IngestReport {
                feed_id: 1,
                total: 2,
                inserted: 2,
                ..Default::default()
            }
        );

        let articles = store.articles.lock().unwrap();
        let links: Vec<&str> = articles.iter().map(|(_, a)| a.link.as_str()).collect();
        assert_eq!(links, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(articles[0].1.description, "<p>Body A</p>");
        assert_eq!(articles[0].1.format, "text/html");
        assert_eq!(articles[0].1.publish_date, "Mon, 02 Jan 2006 15:04:05 +0000");
        assert_eq!(articles[1].1.description, "<p>Body B</p>");
    }

    #[tokio::test]
    async fn test_reingest_counts_existing() {
        let store = MemoryStore::default();
        let fetcher = StubFetcher::with("https://example.com/rss", TWO_ITEMS);
        let feed = feed(1, "https://example.com/rss");

        ingest_feed(&store, &fetcher, &feed).await.unwrap();
        let report = ingest_feed(&store, &fetcher, &feed).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.existing, 2);
        assert_eq!(store.articles.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_item_without_link_skipped() {
        let doc = r#"<rss><channel><title>T</title>
            <item><title>No link</title></item>
            <item><title>Linked</title><link>https://example.com/x</link></item>
        </channel></rss>"#;
        let store = MemoryStore::default();
        let fetcher = StubFetcher::with("u", doc);

        let report = ingest_feed(&store, &fetcher, &feed(1, "u")).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_store_failure_skips_only_that_item() {
        let store = MemoryStore {
            reject: vec!["https://example.com/a".to_string()],
            ..Default::default()
        };
        let fetcher = StubFetcher::with("u", TWO_ITEMS);

        let report = ingest_feed(&store, &fetcher, &feed(1, "u")).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(store.articles.lock().unwrap()[0].1.link, "https://example.com/b");
    }

    #[tokio::test]
    async fn test_store_rejecting_everything_is_store_error() {
        let store = MemoryStore {
            reject: vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
            ],
            ..Default::default()
        };
        let fetcher = StubFetcher::with("u", TWO_ITEMS);

        let result = ingest_feed(&store, &fetcher, &feed(1, "u")).await;
        assert!(matches!(result, Err(IngestError::Store(_))));
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_nothing() {
        let store = MemoryStore::default();
        let fetcher = StubFetcher::default();

        let result = ingest_feed(&store, &fetcher, &feed(1, "https://example.com/gone")).await;
        assert!(matches!(
            result,
            Err(IngestError::Fetch(FetchError::HttpStatus { status: 404, .. }))
        ));
        assert!(store.articles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_writes_nothing() {
        let store = MemoryStore::default();
        let fetcher = StubFetcher::with("u", "<rss><channel><item><link>x</link>");

        let result = ingest_feed(&store, &fetcher, &feed(1, "u")).await;
        assert!(matches!(result, Err(IngestError::Parse(_))));
        assert!(store.articles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_feed_contains_panic() {
        let store = MemoryStore::default();
        let fetcher = StubFetcher::default();

        let outcome = run_feed(&store, &fetcher, &feed(3, "https://panic.example.com/")).await;
        match outcome {
            FeedOutcome::Panicked(msg) => assert!(msg.contains("fetcher exploded")),
            other => panic!("Expected Panicked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_feed_reports_failure() {
        let outcome = run_feed(&MemoryStore::default(), &StubFetcher::default(), &feed(1, "u")).await;
        assert!(matches!(outcome, FeedOutcome::Failed(IngestError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_trigger_ingestion_returns_channel_metadata() {
        let fetcher = StubFetcher::with("u", TWO_ITEMS);
        let ingestion = trigger_ingestion(&MemoryStore::default(), &fetcher, &feed(1, "u"))
            .await
            .unwrap();
        assert_eq!(ingestion.title, "Example Feed");
        assert_eq!(ingestion.description, "Things");
        assert_eq!(ingestion.report.inserted, 2);
    }

    #[tokio::test]
    async fn test_trigger_ingestion_panic_is_unexpected() {
        let result = trigger_ingestion(
            &MemoryStore::default(),
            &StubFetcher::default(),
            &feed(1, "https://panic.example.com/"),
        )
        .await;
        assert!(matches!(result, Err(IngestError::Unexpected(_))));
    }

    fn subscription(url: &str) -> NewSubscription {
        NewSubscription {
            url: url.to_string(),
            feed_size: 4,
            sync: true,
            category_id: None,
            allow_private_hosts: false,
        }
    }

    #[tokio::test]
    async fn test_subscribe_stores_feed_and_articles() {
        let db = Database::open(":memory:").await.unwrap();
        let fetcher = StubFetcher::with("https://example.com/rss", TWO_ITEMS);

        let sub = subscribe(
            &db,
            &fetcher,
            &FullTextProxy::disabled(),
            subscription("https://example.com/rss"),
        )
        .await
        .unwrap();

        assert!(sub.created);
        assert_eq!(sub.ingestion.unwrap().inserted, 2);
        assert_eq!(sub.feed.title, "Example Feed");
        assert_eq!(sub.feed.description, "Things");
        assert_eq!(sub.feed.fetch_url, "https://example.com/rss");

        let articles = db.list_articles(&ArticleQuery::default()).await.unwrap();
        // Only the item with a publish date is listed
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].link, "https://example.com/a");
        assert!(!articles[0].read);
    }

    #[tokio::test]
    async fn test_subscribe_keeps_feed_when_fetch_fails() {
        let db = Database::open(":memory:").await.unwrap();

        let sub = subscribe(
            &db,
            &StubFetcher::default(),
            &FullTextProxy::disabled(),
            subscription("https://example.com/down"),
        )
        .await
        .unwrap();

        assert!(matches!(sub.ingestion, Err(IngestError::Fetch(_))));
        assert_eq!(sub.feed.title, "");
        assert_eq!(db.list_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_succeeds_when_metadata_update_fails() {
        let db = Database::open(":memory:").await.unwrap();
        sqlx::query(
            "CREATE TRIGGER feeds_frozen BEFORE UPDATE ON feeds \
             BEGIN SELECT RAISE(ABORT, 'feeds are frozen'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();
        let fetcher = StubFetcher::with("https://example.com/rss", TWO_ITEMS);

        let sub = subscribe(
            &db,
            &fetcher,
            &FullTextProxy::disabled(),
            subscription("https://example.com/rss"),
        )
        .await
        .unwrap();

        assert!(sub.created);
        assert_eq!(sub.ingestion.unwrap().inserted, 2);
        assert_eq!(sub.feed.title, "");
        assert_eq!(db.list_feeds().await.unwrap(), vec![sub.feed]);
    }

    #[tokio::test]
    async fn test_subscribe_uses_proxy_fetch_url() {
        let db = Database::open(":memory:").await.unwrap();
        let proxy = FullTextProxy::new("https://ftr.example.net/makefulltextfeed.php").unwrap();

        let sub = subscribe(
            &db,
            &StubFetcher::default(),
            &proxy,
            subscription("https://example.com/rss"),
        )
        .await
        .unwrap();
        assert_eq!(
            sub.feed.fetch_url,
            proxy.resolve("https://example.com/rss", 4)
        );
    }

    #[tokio::test]
    async fn test_subscribe_twice_reuses_feed() {
        let db = Database::open(":memory:").await.unwrap();
        let fetcher = StubFetcher::with("https://example.com/rss", TWO_ITEMS);
        let proxy = FullTextProxy::disabled();

        let first = subscribe(&db, &fetcher, &proxy, subscription("https://example.com/rss"))
            .await
            .unwrap();
        let second = subscribe(&db, &fetcher, &proxy, subscription("https://example.com/rss"))
            .await
            .unwrap();

        assert!(!second.created);
        assert_eq!(first.feed.id, second.feed.id);
        assert_eq!(second.ingestion.unwrap().existing, 2);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_private_host() {
        let db = Database::open(":memory:").await.unwrap();
        let result = subscribe(
            &db,
            &StubFetcher::default(),
            &FullTextProxy::disabled(),
            subscription("http://127.0.0.1/rss"),
        )
        .await;
        assert!(matches!(
            result,
            Err(SubscribeError::InvalidUrl(UrlValidationError::Localhost))
        ));
        assert!(db.list_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_zero_feed_size() {
        let db = Database::open(":memory:").await.unwrap();
        let mut request = subscription("https://example.com/rss");
        request.feed_size = 0;
        let result = subscribe(&db, &StubFetcher::default(), &FullTextProxy::disabled(), request).await;
        assert!(matches!(result, Err(SubscribeError::InvalidFeedSize(0))));
    }
}
