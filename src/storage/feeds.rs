use super::schema::Database;
use super::types::{DatabaseError, FeedSource, FeedStats, FeedUpdate, NewFeed};

const FEED_COLUMNS: &str = "id, url, fetch_url, title, description, feed_size, sync, \
                            category_id, created_at, updated_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, or return the existing row when the URL is already subscribed.
    ///
    /// Returns the feed together with `already_existed`.
    pub async fn create_feed(&self, feed: &NewFeed) -> Result<(FeedSource, bool), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let inserted = sqlx::query_as::<_, FeedSource>(&format!(
            r#"
            INSERT INTO feeds (url, fetch_url, feed_size, sync, category_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            RETURNING {FEED_COLUMNS}
        "#
        ))
        .bind(&feed.url)
        .bind(&feed.fetch_url)
        .bind(feed.feed_size)
        .bind(feed.sync)
        .bind(feed.category_id)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(created) = inserted {
            tracing::info!(feed_id = created.id, url = %created.url, "Feed created");
            return Ok((created, false));
        }

        let existing = sqlx::query_as::<_, FeedSource>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"
        ))
        .bind(&feed.url)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok((existing, true))
    }

    /// All feeds ordered by id.
    pub async fn list_feeds(&self) -> Result<Vec<FeedSource>, DatabaseError> {
        let feeds =
            sqlx::query_as::<_, FeedSource>(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"))
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<FeedSource>, DatabaseError> {
        let feed =
            sqlx::query_as::<_, FeedSource>(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(feed)
    }

    /// Apply a partial update to a feed.
    ///
    /// When `url` or `feed_size` changes, `fetch_url` is recomputed with
    /// `resolve_fetch_url(url, feed_size)` in the same transaction, so the
    /// stored fetch URL never disagrees with its inputs.
    ///
    /// Returns `Ok(None)` if the feed does not exist.
    pub async fn update_feed<F>(
        &self,
        feed_id: i64,
        update: &FeedUpdate,
        resolve_fetch_url: F,
    ) -> Result<Option<FeedSource>, DatabaseError>
    where
        F: Fn(&str, i64) -> String,
    {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let current = sqlx::query_as::<_, FeedSource>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let Some(current) = current else {
            return Ok(None);
        };

        let url = update.url.clone().unwrap_or(current.url);
        let feed_size = update.feed_size.unwrap_or(current.feed_size);
        let sync = update.sync.unwrap_or(current.sync);
        let category_id = update.category_id.unwrap_or(current.category_id);
        let fetch_url = if update.url.is_some() || update.feed_size.is_some() {
            resolve_fetch_url(&url, feed_size)
        } else {
            current.fetch_url
        };

        let updated = sqlx::query_as::<_, FeedSource>(&format!(
            r#"
            UPDATE feeds
            SET url = ?, fetch_url = ?, feed_size = ?, sync = ?, category_id = ?, updated_at = ?
            WHERE id = ?
            RETURNING {FEED_COLUMNS}
        "#
        ))
        .bind(&url)
        .bind(&fetch_url)
        .bind(feed_size)
        .bind(sync)
        .bind(category_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(feed_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        tracing::debug!(feed_id = feed_id, fetch_url = %updated.fetch_url, "Feed updated");
        Ok(Some(updated))
    }

    /// Record channel title/description after a successful fetch.
    pub async fn set_feed_metadata(
        &self,
        feed_id: i64,
        title: &str,
        description: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET title = ?, description = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(description)
            .bind(chrono::Utc::now().timestamp())
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Delete a feed and, by cascade, all of its articles.
    ///
    /// Returns whether a row was removed.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Article counts for one feed, `None` if the feed does not exist.
    pub async fn feed_stats(&self, feed_id: i64) -> Result<Option<FeedStats>, DatabaseError> {
        let row: Option<(i64, i64, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT
                COUNT(a.id),
                COUNT(CASE WHEN a.read = 0 THEN 1 END),
                MAX(a.created_at)
            FROM feeds f
            LEFT JOIN articles a ON a.feed_id = f.id
            WHERE f.id = ?
            GROUP BY f.id
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|(total, unread, last)| FeedStats {
            feed_id,
            total_articles: total,
            unread_articles: unread,
            last_ingested_at: last,
        }))
    }
}
