//! SQLite-backed page repository.
//!
//! Persistent tier for single-node deployments. Requires the `sqlite`
//! feature.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{DiscoveryError, Result};
use crate::traits::store::PageRepository;
use crate::types::page::{CachedPage, PageContent};

/// SQLite page repository.
pub struct SqlitePageRepository {
    pool: SqlitePool,
}

impl SqlitePageRepository {
    /// Connect and ensure the schema exists.
    ///
    /// Use `sqlite::memory:` for an ephemeral database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| DiscoveryError::Storage(Box::new(e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                url TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                title TEXT,
                content_hash TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| DiscoveryError::Storage(Box::new(e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl PageRepository for SqlitePageRepository {
    async fn get_by_url(&self, url: &str) -> Result<Option<CachedPage>> {
        let row = sqlx::query(
            "SELECT url, text, title, content_hash, fetched_at FROM pages WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DiscoveryError::Storage(Box::new(e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let text: String = row.get("text");
        let title: Option<String> = row.get("title");
        let fetched_at: String = row.get("fetched_at");
        let fetched_at = fetched_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now());

        let mut content = PageContent::new(text);
        if let Some(title) = title {
            content = content.with_title(title);
        }

        Ok(Some(CachedPage {
            url: row.get("url"),
            content,
            content_hash: row.get("content_hash"),
            fetched_at,
        }))
    }

    async fn upsert(&self, page: &CachedPage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pages (url, text, title, content_hash, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                text = excluded.text,
                title = excluded.title,
                content_hash = excluded.content_hash,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&page.url)
        .bind(&page.content.text)
        .bind(&page.content.title)
        .bind(&page.content_hash)
        .bind(page.fetched_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| DiscoveryError::Storage(Box::new(e)))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DiscoveryError::Storage(Box::new(e)))?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }
}
