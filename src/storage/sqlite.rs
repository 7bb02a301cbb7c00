use crate::models::{ClickMetadata, Feedback, Link};
use crate::storage::rows::{self, FacetRow, LinkRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open SQLite database at {database_url}"))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                short_code TEXT PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                original_url TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                first_click_at INTEGER,
                last_click_at INTEGER
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        // One row per distinct value; the primary key gives set semantics
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_facets (
                short_code TEXT NOT NULL,
                facet TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (short_code, facet, value)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sequences (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feedback_owner ON feedback(owner_id, created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sequences (name, value)
            VALUES (?, 1)
            ON CONFLICT(name) DO UPDATE SET value = sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(self.pool.as_ref())
        .await?;

        u64::try_from(value).with_context(|| format!("sequence '{name}' is negative: {value}"))
    }

    async fn create(&self, link: &Link) -> StorageResult<Link> {
        let result = sqlx::query(
            r#"
            INSERT INTO links (short_code, owner_id, original_url, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(&link.short_code)
        .bind(link.owner_id)
        .bind(&link.original_url)
        .bind(link.created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(Link::new(
            link.short_code.clone(),
            link.owner_id,
            link.original_url.clone(),
            link.created_at,
        ))
    }

    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT short_code, owner_id, original_url, created_at, clicks, first_click_at, last_click_at
            FROM links
            WHERE short_code = ?
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let facets = sqlx::query_as::<_, FacetRow>(
            r#"
            SELECT short_code, facet, value
            FROM link_facets
            WHERE short_code = ?
            "#,
        )
        .bind(short_code)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut link = row.into_link();
        rows::apply_facets(&mut link, facets);
        Ok(Some(link))
    }

    async fn find_by_owner(&self, owner_id: i64) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT short_code, owner_id, original_url, created_at, clicks, first_click_at, last_click_at
            FROM links
            WHERE owner_id = ?
            ORDER BY created_at DESC, short_code
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        if links.is_empty() {
            return Ok(vec![]);
        }

        let facets = sqlx::query_as::<_, FacetRow>(
            r#"
            SELECT f.short_code, f.facet, f.value
            FROM link_facets f
            JOIN links l ON l.short_code = f.short_code
            WHERE l.owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows::assemble(links, facets))
    }

    async fn delete_by_code_and_owner(&self, short_code: &str, owner_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM links WHERE short_code = ? AND owner_id = ?")
            .bind(short_code)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM link_facets WHERE short_code = ?")
            .bind(short_code)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn record_click(&self, short_code: &str, metadata: &ClickMetadata) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE links
            SET clicks = clicks + 1,
                first_click_at = MIN(COALESCE(first_click_at, ?), ?),
                last_click_at = MAX(COALESCE(last_click_at, ?), ?)
            WHERE short_code = ?
            "#,
        )
        .bind(metadata.clicked_at)
        .bind(metadata.clicked_at)
        .bind(metadata.clicked_at)
        .bind(metadata.clicked_at)
        .bind(short_code)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (facet, value) in metadata.facets() {
            sqlx::query(
                r#"
                INSERT INTO link_facets (short_code, facet, value)
                VALUES (?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(short_code)
            .bind(facet.as_str())
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn latest_feedback_at(&self, owner_id: i64) -> Result<Option<i64>> {
        let latest = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(created_at) FROM feedback WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(latest)
    }

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        sqlx::query("INSERT INTO feedback (owner_id, message, created_at) VALUES (?, ?, ?)")
            .bind(feedback.owner_id)
            .bind(&feedback.message)
            .bind(feedback.created_at)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn metadata(country: &str) -> ClickMetadata {
        metadata_at(country, 1_000)
    }

    fn metadata_at(country: &str, clicked_at: i64) -> ClickMetadata {
        ClickMetadata {
            clicked_at,
            country: country.to_string(),
            city: "Unknown".to_string(),
            device: "Desktop".to_string(),
            os: "Linux".to_string(),
            browser: "Firefox".to_string(),
        }
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let storage = storage().await;
        storage.init().await.unwrap();
    }

    #[tokio::test]
    async fn sequences_are_independent() {
        let storage = storage().await;
        assert_eq!(storage.next_sequence("a").await.unwrap(), 1);
        assert_eq!(storage.next_sequence("a").await.unwrap(), 2);
        assert_eq!(storage.next_sequence("b").await.unwrap(), 1);
        assert_eq!(storage.next_sequence("a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn record_click_on_missing_code_is_a_no_op() {
        let storage = storage().await;
        assert!(!storage.record_click("missing", &metadata("India")).await.unwrap());
        let facets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM link_facets")
            .fetch_one(storage.pool.as_ref())
            .await
            .unwrap();
        assert_eq!(facets, 0);
    }

    #[tokio::test]
    async fn delete_removes_facet_rows() {
        let storage = storage().await;
        let link = Link::new("abcdefg".into(), 1, "https://example.com".into(), 0);
        storage.create(&link).await.unwrap();
        storage.record_click("abcdefg", &metadata("India")).await.unwrap();

        assert!(storage.delete_by_code_and_owner("abcdefg", 1).await.unwrap());

        let facets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM link_facets WHERE short_code = ?")
            .bind("abcdefg")
            .fetch_one(storage.pool.as_ref())
            .await
            .unwrap();
        assert_eq!(facets, 0);
    }

    #[tokio::test]
    async fn late_writes_keep_the_earliest_click_first() {
        let storage = storage().await;
        let link = Link::new("abcdefg".into(), 1, "https://example.com".into(), 0);
        storage.create(&link).await.unwrap();

        storage.record_click("abcdefg", &metadata_at("USA", 2_000)).await.unwrap();
        storage.record_click("abcdefg", &metadata_at("India", 1_000)).await.unwrap();
        storage.record_click("abcdefg", &metadata_at("India", 1_500)).await.unwrap();

        let link = storage.find_by_code("abcdefg").await.unwrap().unwrap();
        assert_eq!(link.clicks, 3);
        assert_eq!(link.first_click_at, Some(1_000));
        assert_eq!(link.last_click_at, Some(2_000));
    }
}
