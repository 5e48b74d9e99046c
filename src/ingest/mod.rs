//! The ingestion pipeline: periodic polling of every subscribed feed.
//!
//! The pipeline reaches storage and the network only through [`FeedStore`]
//! and [`FeedFetcher`], which lets tests drive it with in-process doubles.
//!
//! - `worker` ingests one feed and contains its faults
//! - `scheduler` runs ingestion cycles on an interval until stopped

mod scheduler;
#[cfg(test)]
pub(crate) mod test_support;
mod worker;

pub use scheduler::{
    run_cycle, CycleSummary, Scheduler, SchedulerError, SchedulerHandle, SchedulerState,
    DEFAULT_POLL_INTERVAL,
};
pub use worker::{
    ingest_feed, run_feed, subscribe, trigger_ingestion, FeedOutcome, IngestError, IngestReport,
    Ingestion, NewSubscription, SubscribeError, Subscription,
};

use crate::feed::{FetchError, HttpFetcher};
use crate::storage::{Article, Database, DatabaseError, FeedSource, NewArticle};

/// Storage operations the pipeline depends on.
#[async_trait::async_trait]
pub trait FeedStore: Send + Sync {
    /// Every feed, in a stable order.
    async fn list_feeds(&self) -> Result<Vec<FeedSource>, DatabaseError>;

    /// Insert an article unless (feed, link) already exists.
    ///
    /// Returns the stored row and whether it already existed.
    async fn upsert_article(
        &self,
        feed_id: i64,
        article: &NewArticle,
    ) -> Result<(Article, bool), DatabaseError>;
}

/// Retrieval of raw feed documents.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait::async_trait]
impl FeedStore for Database {
    async fn list_feeds(&self) -> Result<Vec<FeedSource>, DatabaseError> {
        Database::list_feeds(self).await
    }

    async fn upsert_article(
        &self,
        feed_id: i64,
        article: &NewArticle,
    ) -> Result<(Article, bool), DatabaseError> {
        Database::upsert_article(self, feed_id, article).await
    }
}

#[async_trait::async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.get(url).await
    }
}
