//! feedmill polls subscribed RSS feeds, optionally through a full-text
//! extraction proxy, and stores sanitized entries in SQLite.

pub mod config;
pub mod content;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
