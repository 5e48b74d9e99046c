use url::Url;

/// Default full-text extraction endpoint
pub const DEFAULT_PROXY_URL: &str = "http://fullfeedrss:80/makefulltextfeed.php";

/// Resolves a feed's origin URL into the URL that is actually fetched.
///
/// With a proxy configured, the origin is passed through a full-text
/// extraction service that returns an RSS document with complete article
/// bodies:
///
/// ```text
/// {base}?url={origin}&max={feed_size}&links=preserve
/// ```
///
/// Without one, the origin URL is fetched directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullTextProxy {
    base: Option<Url>,
}

impl FullTextProxy {
    /// A proxy at `base`. An empty string disables the proxy.
    pub fn new(base: &str) -> Result<Self, url::ParseError> {
        let base = base.trim();
        if base.is_empty() {
            return Ok(Self::disabled());
        }
        Ok(Self {
            base: Some(Url::parse(base)?),
        })
    }

    pub fn disabled() -> Self {
        Self { base: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.base.is_some()
    }

    /// Fetch URL for `origin` limited to `max_items` entries.
    ///
    /// Pure: the same inputs always give the same output.
    pub fn resolve(&self, origin: &str, max_items: i64) -> String {
        match &self.base {
            None => origin.to_string(),
            Some(base) => {
                let mut url = base.clone();
                url.query_pairs_mut()
                    .append_pair("url", origin)
                    .append_pair("max", &max_items.to_string())
                    .append_pair("links", "preserve");
                url.to_string()
            }
        }
    }
}

impl Default for FullTextProxy {
    fn default() -> Self {
        Self {
            base: Url::parse(DEFAULT_PROXY_URL).ok(),
        }
    }
}
