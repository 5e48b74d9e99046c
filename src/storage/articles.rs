use chrono::{DateTime, FixedOffset};

use super::schema::Database;
use super::types::{Article, ArticleQuery, DatabaseError, NewArticle};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Default page size for article listings
pub const DEFAULT_ARTICLE_LIMIT: i64 = 100;

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

pub(crate) const ARTICLE_COLUMNS: &str = "id, feed_id, title, link, guid, description, \
                                          publish_date, format, identifier, read, \
                                          created_at, updated_at";

/// Parse a feed-supplied publish date. RSS uses RFC 2822; many feeds use RFC 3339.
pub(crate) fn parse_publish_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

/// Newest first; dates that do not parse sort after all parseable ones,
/// ties broken by id descending.
pub(crate) const NEWEST_FIRST: &str = "published_at IS NULL, published_at DESC, id DESC";

impl Database {
    // ========================================================================
    // Article Upsert
    // ========================================================================

    /// Insert an article unless (`feed_id`, `link`) is already stored.
    ///
    /// Returns the stored article and whether it already existed. An existing
    /// row is returned untouched: its read flag and metadata are never
    /// overwritten by re-ingestion.
    pub async fn upsert_article(
        &self,
        feed_id: i64,
        article: &NewArticle,
    ) -> Result<(Article, bool), DatabaseError> {
        let now = chrono::Utc::now().timestamp();

        let inserted = sqlx::query_as::<_, Article>(&format!(
            r#"
            INSERT INTO articles
                (feed_id, title, link, guid, description, publish_date, published_at, format,
                 identifier, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, link) DO NOTHING
            RETURNING {ARTICLE_COLUMNS}
        "#
        ))
        .bind(feed_id)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.guid)
        .bind(&article.description)
        .bind(&article.publish_date)
        .bind(parse_publish_date(&article.publish_date).map(|d| d.timestamp()))
        .bind(&article.format)
        .bind(&article.identifier)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(created) = inserted {
            return Ok((created, false));
        }

        let existing = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE feed_id = ? AND link = ?"
        ))
        .bind(feed_id)
        .bind(&article.link)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok((existing, true))
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// List articles, newest publish date first.
    ///
    /// Articles with an empty `publish_date` are excluded. Ordering uses the
    /// date parsed at insert time; rows whose date did not parse come last.
    /// The limit defaults to [`DEFAULT_ARTICLE_LIMIT`] and is capped at
    /// `MAX_ARTICLES`.
    pub async fn list_articles(&self, query: &ArticleQuery) -> Result<Vec<Article>, DatabaseError> {
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_ARTICLE_LIMIT)
            .min(MAX_ARTICLES);
        tracing::debug!(
            limit = limit,
            feed_id = ?query.feed_id,
            unread_only = query.unread_only,
            "list_articles with limit cap"
        );

        sqlx::query_as::<_, Article>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS}
            FROM articles
            WHERE publish_date != ''
              AND (?1 IS NULL OR feed_id = ?1)
              AND (?2 = 0 OR read = 0)
            ORDER BY {NEWEST_FIRST}
            LIMIT ?3
        "#
        ))
        .bind(query.feed_id)
        .bind(query.unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, DatabaseError> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(article)
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Set the read flag, returning the updated article (`None` if it does not exist).
    pub async fn set_article_read(
        &self,
        article_id: i64,
        read: bool,
    ) -> Result<Option<Article>, DatabaseError> {
        let article = sqlx::query_as::<_, Article>(&format!(
            "UPDATE articles SET read = ?, updated_at = ? WHERE id = ? RETURNING {ARTICLE_COLUMNS}"
        ))
        .bind(read)
        .bind(chrono::Utc::now().timestamp())
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(article)
    }

    /// Delete a single article. Returns whether a row was removed.
    ///
    /// The link is not remembered: if the feed still carries the item, the
    /// next cycle stores it again.
    pub async fn delete_article(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM articles WHERE id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}
