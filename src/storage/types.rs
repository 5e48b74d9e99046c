use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persistence failures surfaced by [`Database`](super::Database).
///
/// A duplicate article insert is *not* an error: it is reported as
/// `already_existed = true` by `upsert_article`.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process. Close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A uniqueness constraint rejected the write (e.g. a second feed with the same URL)
    #[error("Conflicting record: {0}")]
    Conflict(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error into lock, conflict, or generic failure.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return DatabaseError::Conflict(db_err.message().to_string());
            }
        }

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Feed Types
// ============================================================================

/// A subscribed feed.
///
/// `fetch_url` is always derived from (`url`, `feed_size`) and is recomputed
/// whenever either changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FeedSource {
    pub id: i64,
    pub url: String,
    pub fetch_url: String,
    pub title: String,
    pub description: String,
    pub feed_size: i64,
    pub sync: bool,
    pub category_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for [`Database::create_feed`](super::Database::create_feed).
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub url: String,
    pub fetch_url: String,
    pub feed_size: i64,
    pub sync: bool,
    pub category_id: Option<i64>,
}

/// Typed partial update for a feed. `None` leaves a field untouched.
///
/// `category_id` is doubly optional: `Some(None)` clears the category,
/// `Some(Some(id))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedUpdate {
    pub url: Option<String>,
    pub feed_size: Option<i64>,
    pub sync: Option<bool>,
    pub category_id: Option<Option<i64>>,
}

impl FeedUpdate {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.feed_size.is_none()
            && self.sync.is_none()
            && self.category_id.is_none()
    }
}

/// Per-feed article counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub feed_id: i64,
    pub total_articles: i64,
    pub unread_articles: i64,
    /// Most recent `created_at` among the feed's articles
    pub last_ingested_at: Option<i64>,
}

// ============================================================================
// Article Types
// ============================================================================

/// A stored feed entry. Unique per (`feed_id`, `link`).
///
/// `publish_date` is kept exactly as the feed supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub publish_date: String,
    pub format: String,
    pub identifier: String,
    pub read: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An article as produced by the ingestion worker, before it has an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub publish_date: String,
    pub format: String,
    pub identifier: String,
}

/// Filters for [`Database::list_articles`](super::Database::list_articles).
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub feed_id: Option<i64>,
    pub unread_only: bool,
    pub limit: Option<i64>,
}
