//! In-process doubles for the pipeline seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{FeedFetcher, FeedStore};
use crate::feed::FetchError;
use crate::storage::{Article, DatabaseError, FeedSource, NewArticle};

pub(crate) const TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example Feed</title>
    <description>Things</description>
    <item>
      <title>A</title>
      <link>https://example.com/a</link>
      <description><![CDATA[<p>Body A</p><script>x()</script>]]></description>
      <pubDate>Mon, 02 Jan 2006 15:04:05 +0000</pubDate>
      <dc:format>text/html</dc:format>
    </item>
    <item>
      <title>B</title>
      <link>https://example.com/b</link>
      <description>Body B</description>
    </item>
  </channel>
</rss>"#;

pub(crate) fn feed(id: i64, fetch_url: &str) -> FeedSource {
    FeedSource {
        id,
        url: fetch_url.to_string(),
        fetch_url: fetch_url.to_string(),
        title: String::new(),
        description: String::new(),
        feed_size: 4,
        sync: true,
        category_id: None,
        created_at: 0,
        updated_at: 0,
    }
}

/// Serves canned documents. Unknown URLs are 404s; URLs containing "panic"
/// panic. Every requested URL is recorded in `requested`.
#[derive(Default)]
pub(crate) struct StubFetcher {
    docs: HashMap<String, String>,
    pub(crate) requested: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub(crate) fn with(url: &str, body: &str) -> Self {
        Self::default().and(url, body)
    }

    pub(crate) fn and(mut self, url: &str, body: &str) -> Self {
        self.docs.insert(url.to_string(), body.to_string());
        self
    }

    /// Drain the URLs requested so far.
    pub(crate) fn take_requested(&self) -> Vec<String> {
        std::mem::take(&mut *self.requested.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requested.lock().unwrap().push(url.to_string());
        if url.contains("panic") {
            panic!("fetcher exploded for {}", url);
        }
        self.docs
            .get(url)
            .map(|b| b.clone().into_bytes())
            .ok_or_else(|| FetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Keeps feeds and articles in memory. Links in `reject` fail to store;
/// `fail_list` makes `list_feeds` fail. The feed list can change between
/// cycles.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) feeds: Mutex<Vec<FeedSource>>,
    pub(crate) articles: Mutex<Vec<(i64, NewArticle)>>,
    pub(crate) reject: Vec<String>,
    pub(crate) fail_list: bool,
    pub(crate) list_calls: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn with_feeds(feeds: Vec<FeedSource>) -> Self {
        Self {
            feeds: Mutex::new(feeds),
            ..Default::default()
        }
    }

    pub(crate) fn add_feed(&self, feed: FeedSource) {
        self.feeds.lock().unwrap().push(feed);
    }

    pub(crate) fn remove_feed(&self, feed_id: i64) {
        self.feeds.lock().unwrap().retain(|f| f.id != feed_id);
    }

    pub(crate) fn set_sync(&self, feed_id: i64, sync: bool) {
        for feed in self.feeds.lock().unwrap().iter_mut() {
            if feed.id == feed_id {
                feed.sync = sync;
            }
        }
    }

    pub(crate) fn links(&self) -> Vec<(i64, String)> {
        self.articles
            .lock()
            .unwrap()
            .iter()
            .map(|(f, a)| (*f, a.link.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl FeedStore for MemoryStore {
    async fn list_feeds(&self) -> Result<Vec<FeedSource>, DatabaseError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(DatabaseError::InstanceLocked);
        }
        Ok(self.feeds.lock().unwrap().clone())
    }

    async fn upsert_article(
        &self,
        feed_id: i64,
        article: &NewArticle,
    ) -> Result<(Article, bool), DatabaseError> {
        if self.reject.contains(&article.link) {
            return Err(DatabaseError::Conflict("rejected".to_string()));
        }
        let mut articles = self.articles.lock().unwrap();
        let existed = articles
            .iter()
            .any(|(f, a)| *f == feed_id && a.link == article.link);
        if !existed {
            articles.push((feed_id, article.clone()));
        }
        let stored = Article {
            id: articles.len() as i64,
            feed_id,
            title: article.title.clone(),
            link: article.link.clone(),
            guid: article.guid.clone(),
            description: article.description.clone(),
            publish_date: article.publish_date.clone(),
            format: article.format.clone(),
            identifier: article.identifier.clone(),
            read: false,
            created_at: 0,
            updated_at: 0,
        };
        Ok((stored, existed))
    }
}
