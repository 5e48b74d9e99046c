use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response body limit (10MB)
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

const MAX_REDIRECTS: usize = 5;

/// Errors from retrieving a feed. Every request failure carries the requested URL.
///
/// There is no retry at this layer; the next polling cycle is the retry.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// HTTP response with non-2xx status code
    #[error("HTTP error from {url}: status {status}")]
    HttpStatus { url: String, status: u16 },
    /// Request exceeded the configured timeout
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    /// Response body exceeded the size limit
    #[error("Response from {url} exceeds {limit} bytes")]
    ResponseTooLarge { url: String, limit: usize },
    /// The URL could not be requested at all
    #[error("Invalid fetch URL: {url}")]
    InvalidUrl { url: String },
    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// HTTP retrieval of feed payloads.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpFetcher {
    /// Build a fetcher with its own connection pool.
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("feedmill/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    /// GET `url` and return the raw body.
    pub async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        let response = tokio::time::timeout(self.timeout, self.client.get(parsed).send())
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // The timeout covers the body as well as the headers
        tokio::time::timeout(self.timeout, read_limited_bytes(url, response, self.max_bytes))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
            })?
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: err,
        }
    }
}

async fn read_limited_bytes(
    url: &str,
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let too_large = || FetchError::ResponseTooLarge {
        url: url.to_string(),
        limit,
    };

    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(too_large());
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify(url, e))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
