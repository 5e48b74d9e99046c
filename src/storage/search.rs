use super::articles::{ARTICLE_COLUMNS, NEWEST_FIRST};
use super::schema::Database;
use super::types::{Article, DatabaseError};

/// Default number of search hits
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

const MAX_SEARCH_RESULTS: i64 = 500;
const MAX_QUERY_LENGTH: usize = 256;

/// Escape `LIKE` wildcards so the query matches literally (escape char `\`).
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl Database {
    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Full-text search over article titles and descriptions.
    ///
    /// Uses FTS5 `MATCH`; queries FTS5 cannot parse (unbalanced quotes, stray
    /// operators) fall back to a literal substring `LIKE`. Both paths skip
    /// undated articles and order like [`Database::list_articles`].
    /// Empty queries return no results.
    pub async fn search_articles(
        &self,
        query: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Article>, DatabaseError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let query: String = query.chars().take(MAX_QUERY_LENGTH).collect();
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_RESULTS);

        let fts_result = sqlx::query_as::<_, Article>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS}
            FROM articles
            WHERE id IN (SELECT rowid FROM articles_fts WHERE articles_fts MATCH ?)
              AND publish_date != ''
            ORDER BY {NEWEST_FIRST}
            LIMIT ?
        "#
        ))
        .bind(&query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match fts_result {
            Ok(rows) => Ok(rows),
            Err(e) => {
                tracing::warn!(error = %e, query = %query, "FTS5 search failed, falling back to LIKE");
                let like_pattern = format!("%{}%", escape_like(&query));
                sqlx::query_as::<_, Article>(&format!(
                    r#"
                    SELECT {ARTICLE_COLUMNS}
                    FROM articles
                    WHERE (title LIKE ?1 ESCAPE '\' OR description LIKE ?1 ESCAPE '\')
                      AND publish_date != ''
                    ORDER BY {NEWEST_FIRST}
                    LIMIT ?2
                "#
                ))
                .bind(&like_pattern)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)
            }
        }
    }

    // ========================================================================
    // FTS5 Maintenance Operations
    // ========================================================================

    /// Rebuild the FTS5 index from the articles table.
    ///
    /// Returns the number of articles indexed.
    pub async fn rebuild_search_index(&self) -> Result<i64, DatabaseError> {
        sqlx::query("INSERT INTO articles_fts(articles_fts) VALUES('rebuild')")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        tracing::info!(articles = count, "Search index rebuilt");
        Ok(count)
    }
}
