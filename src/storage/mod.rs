//! SQLite-backed store for feeds and articles.
//!
//! Articles are unique per (feed, link); [`Database::upsert_article`] is the
//! only write path used by ingestion and never modifies an existing row.

mod articles;
mod feeds;
mod schema;
mod search;
mod types;

pub use articles::DEFAULT_ARTICLE_LIMIT;
pub use schema::Database;
pub use search::DEFAULT_SEARCH_LIMIT;
pub use types::{
    Article, ArticleQuery, DatabaseError, FeedSource, FeedStats, FeedUpdate, NewArticle, NewFeed,
};
