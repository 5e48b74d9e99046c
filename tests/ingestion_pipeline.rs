//! End-to-end ingestion: HTTP (wiremock) → parser → sanitizer → SQLite.
//!
//! Each test owns an in-memory database and a mock server.

use std::sync::Arc;
use std::time::Duration;

use feedmill::feed::{FetchError, FullTextProxy, HttpFetcher};
use feedmill::ingest::{
    run_cycle, subscribe, CycleSummary, FeedFetcher, FeedStore, IngestError, NewSubscription,
    Scheduler, SchedulerState,
};
use feedmill::storage::{ArticleQuery, Database, FeedSource, NewFeed};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Feed</title>
    <description>An example</description>
    <item>
      <title>First</title>
      <link>https://example.com/a</link>
      <description><![CDATA[<p>Hello <b>world</b></p><script>steal()</script>]]></description>
      <pubDate>Tue, 03 Jan 2006 10:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/b</link>
      <description>Plain &amp; simple</description>
      <pubDate>Mon, 02 Jan 2006 10:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5), 1024 * 1024).unwrap()
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn add_feed(db: &Database, fetch_url: &str) -> FeedSource {
    db.create_feed(&NewFeed {
        url: fetch_url.to_string(),
        fetch_url: fetch_url.to_string(),
        feed_size: 4,
        sync: true,
        category_id: None,
    })
    .await
    .unwrap()
    .0
}

fn subscription(url: String) -> NewSubscription {
    NewSubscription {
        url,
        feed_size: 4,
        sync: true,
        category_id: None,
        allow_private_hosts: true,
    }
}

#[tokio::test]
async fn test_example_feed_ingested_once() {
    let server = MockServer::start().await;
    serve(&server, "/rss", EXAMPLE_FEED).await;
    let db = test_db().await;

    let sub = subscribe(
        &db,
        &fetcher(),
        &FullTextProxy::disabled(),
        subscription(format!("{}/rss", server.uri())),
    )
    .await
    .unwrap();
    assert_eq!(sub.ingestion.unwrap().inserted, 2);
    assert_eq!(sub.feed.title, "Example Feed");

    let articles = db.list_articles(&ArticleQuery::default()).await.unwrap();
    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].title, "First");
    assert_eq!(articles[0].description, "<p>Hello <strong>world</strong></p>");
    assert_eq!(articles[1].description, "<p>Plain &amp; simple</p>");
    assert!(articles.iter().all(|a| !a.read));

    // A full cycle over the same document changes nothing
    let summary = run_cycle(&db, &fetcher()).await;
    assert_eq!(
        summary,
        CycleSummary {
            feeds: 1,
            succeeded: 1,
            ..Default::default()
        }
    );
    let again = db.list_articles(&ArticleQuery::default()).await.unwrap();
    assert_eq!(again, articles);
}

#[tokio::test]
async fn test_subscription_fetches_through_proxy() {
    let server = MockServer::start().await;
    let origin = "https://blog.example.com/feed.xml";
    Mock::given(method("GET"))
        .and(path("/makefulltextfeed.php"))
        .and(query_param("url", origin))
        .and(query_param("max", "7"))
        .and(query_param("links", "preserve"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXAMPLE_FEED))
        .expect(1)
        .mount(&server)
        .await;
    let db = test_db().await;
    let proxy = FullTextProxy::new(&format!("{}/makefulltextfeed.php", server.uri())).unwrap();

    let mut request = subscription(origin.to_string());
    request.feed_size = 7;
    let sub = subscribe(&db, &fetcher(), &proxy, request).await.unwrap();

    assert_eq!(sub.feed.url, origin);
    assert!(sub.feed.fetch_url.starts_with(&server.uri()));
    assert_eq!(sub.ingestion.unwrap().inserted, 2);
}

#[tokio::test]
async fn test_unparseable_document_leaves_feed_unchanged() {
    let server = MockServer::start().await;
    serve(&server, "/broken", "<rss><channel><item><title>cut off").await;
    let db = test_db().await;
    let feed = add_feed(&db, &format!("{}/broken", server.uri())).await;

    let summary = run_cycle(&db, &fetcher()).await;
    assert_eq!(summary.failed, 1);
    assert!(db.list_articles(&ArticleQuery::default()).await.unwrap().is_empty());
    assert_eq!(db.get_feed(feed.id).await.unwrap(), Some(feed));
}

#[tokio::test]
async fn test_subscription_survives_parse_failure() {
    let server = MockServer::start().await;
    serve(&server, "/html", "<html><body>not a feed</body></html>").await;
    let db = test_db().await;

    let sub = subscribe(
        &db,
        &fetcher(),
        &FullTextProxy::disabled(),
        subscription(format!("{}/html", server.uri())),
    )
    .await
    .unwrap();

    assert!(matches!(sub.ingestion, Err(IngestError::Parse(_))));
    assert_eq!(db.list_feeds().await.unwrap(), vec![sub.feed]);
}

#[tokio::test]
async fn test_read_flag_survives_reingestion() {
    let server = MockServer::start().await;
    serve(&server, "/rss", EXAMPLE_FEED).await;
    let db = test_db().await;
    add_feed(&db, &format!("{}/rss", server.uri())).await;

    run_cycle(&db, &fetcher()).await;
    let first = &db.list_articles(&ArticleQuery::default()).await.unwrap()[0];
    db.set_article_read(first.id, true).await.unwrap();

    run_cycle(&db, &fetcher()).await;
    let article = db.get_article(first.id).await.unwrap().unwrap();
    assert!(article.read);

    let unread = db
        .list_articles(&ArticleQuery {
            unread_only: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(unread.len(), 1);
}

#[tokio::test]
async fn test_failing_feed_does_not_block_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    serve(&server, "/rss", EXAMPLE_FEED).await;
    let db = test_db().await;
    add_feed(&db, &format!("{}/down", server.uri())).await;
    let healthy = add_feed(&db, &format!("{}/rss", server.uri())).await;

    let summary = run_cycle(&db, &fetcher()).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);

    let articles = db.list_articles(&ArticleQuery::default()).await.unwrap();
    assert_eq!(articles.len(), 2);
    assert!(articles.iter().all(|a| a.feed_id == healthy.id));
}

#[tokio::test]
async fn test_same_link_in_two_feeds_stored_twice() {
    let server = MockServer::start().await;
    serve(&server, "/one", EXAMPLE_FEED).await;
    serve(&server, "/two", EXAMPLE_FEED).await;
    let db = test_db().await;
    add_feed(&db, &format!("{}/one", server.uri())).await;
    add_feed(&db, &format!("{}/two", server.uri())).await;

    let summary = run_cycle(&db, &fetcher()).await;
    assert_eq!(summary.inserted, 4);
}

#[tokio::test]
async fn test_disabled_feed_not_polled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EXAMPLE_FEED))
        .expect(0)
        .mount(&server)
        .await;
    let db = test_db().await;
    let feed = add_feed(&db, &format!("{}/rss", server.uri())).await;
    db.update_feed(
        feed.id,
        &feedmill::storage::FeedUpdate {
            sync: Some(false),
            ..Default::default()
        },
        |url, _| url.to_string(),
    )
    .await
    .unwrap();

    let summary = run_cycle(&db, &fetcher()).await;
    assert_eq!(summary.skipped, 1);
}

/// Panics when asked for one specific URL.
struct PoisonedFetcher {
    inner: HttpFetcher,
    poison: String,
}

#[async_trait::async_trait]
impl FeedFetcher for PoisonedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url == self.poison {
            panic!("poisoned feed {}", url);
        }
        self.inner.get(url).await
    }
}

#[tokio::test]
async fn test_panicking_feed_is_contained() {
    let server = MockServer::start().await;
    serve(&server, "/rss", EXAMPLE_FEED).await;
    let db = test_db().await;
    let poison = format!("{}/poison", server.uri());
    add_feed(&db, &poison).await;
    add_feed(&db, &format!("{}/rss", server.uri())).await;

    let fetcher = PoisonedFetcher {
        inner: fetcher(),
        poison,
    };
    let summary = run_cycle(&db, &fetcher).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.inserted, 2);
}

#[tokio::test]
async fn test_scheduler_ingests_and_stops() {
    let server = MockServer::start().await;
    serve(&server, "/rss", EXAMPLE_FEED).await;
    let db = test_db().await;
    add_feed(&db, &format!("{}/rss", server.uri())).await;

    let store: Arc<dyn FeedStore> = Arc::new(db.clone());
    let handle = Scheduler::new(store, Arc::new(fetcher()), Duration::from_secs(3600)).spawn();
    let mut state = handle.watch();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == SchedulerState::Idle { completed: 1 }),
    )
    .await
    .expect("first cycle did not finish")
    .unwrap();

    handle.stop().await.unwrap();
    assert_eq!(*state.borrow(), SchedulerState::Stopped);
    assert_eq!(db.list_articles(&ArticleQuery::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_ingested_articles_are_searchable() {
    let server = MockServer::start().await;
    serve(&server, "/rss", EXAMPLE_FEED).await;
    let db = test_db().await;
    add_feed(&db, &format!("{}/rss", server.uri())).await;

    run_cycle(&db, &fetcher()).await;
    let hits = db.search_articles("world", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].link, "https://example.com/a");
    assert!(db.search_articles("steal", None).await.unwrap().is_empty());
}
