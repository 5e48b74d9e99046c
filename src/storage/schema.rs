use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the article store.
///
/// Constructed once at startup and cloned into every task that needs it;
/// clones share the same connection pool. Call [`Database::close`] on shutdown.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if the file is locked by another
    /// process, `DatabaseError::Migration` if the schema could not be applied.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout lets a CLI write and the polling daemon share the file
        // without surfacing SQLITE_BUSY on short contention.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Other(inner) => DatabaseError::Migration(inner.to_string()),
            other => other,
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Apply the schema inside a single transaction.
    ///
    /// Every statement is `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                fetch_url TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                feed_size INTEGER NOT NULL DEFAULT 4,
                sync INTEGER NOT NULL DEFAULT 1,
                category_id INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT NOT NULL DEFAULT '',
                link TEXT NOT NULL,
                guid TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                publish_date TEXT NOT NULL DEFAULT '',
                published_at INTEGER,
                format TEXT NOT NULL DEFAULT '',
                identifier TEXT NOT NULL DEFAULT '',
                read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(feed_id, link)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_feed_read ON articles(feed_id, read)")
            .execute(&mut *tx)
            .await?;

        // `published_at` is the parsed `publish_date` (unix seconds), NULL when unparseable
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC, id DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS articles_fts
            USING fts5(title, description, content=articles, content_rowid=id)
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Keep the external-content index in step with the articles table.
        // Read-state toggles do not touch indexed columns, so the update
        // trigger is scoped to title/description.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS articles_fts_insert AFTER INSERT ON articles BEGIN
                INSERT INTO articles_fts(rowid, title, description)
                VALUES (new.id, new.title, new.description);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS articles_fts_delete AFTER DELETE ON articles BEGIN
                INSERT INTO articles_fts(articles_fts, rowid, title, description)
                VALUES ('delete', old.id, old.title, old.description);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS articles_fts_update
            AFTER UPDATE OF title, description ON articles BEGIN
                INSERT INTO articles_fts(articles_fts, rowid, title, description)
                VALUES ('delete', old.id, old.title, old.description);
                INSERT INTO articles_fts(rowid, title, description)
                VALUES (new.id, new.title, new.description);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
