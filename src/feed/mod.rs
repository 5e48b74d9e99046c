//! Feed retrieval and decoding.
//!
//! - `parser` decodes RSS 2.0 payloads into [`ParsedFeed`]
//! - `fetcher` performs bounded HTTP retrieval
//! - `proxy` derives the fetch URL through the full-text extraction proxy

mod fetcher;
mod parser;
mod proxy;

pub use fetcher::{FetchError, HttpFetcher, DEFAULT_MAX_BYTES, DEFAULT_TIMEOUT};
pub use parser::{parse_feed, ParseError, ParsedFeed, ParsedItem};
pub use proxy::{FullTextProxy, DEFAULT_PROXY_URL};
