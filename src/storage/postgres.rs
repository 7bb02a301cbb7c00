use crate::models::{ClickMetadata, Feedback, Link};
use crate::storage::rows::{self, FacetRow, LinkRow};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                short_code TEXT PRIMARY KEY,
                owner_id BIGINT NOT NULL,
                original_url TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                clicks BIGINT NOT NULL DEFAULT 0,
                first_click_at BIGINT,
                last_click_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

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
                value BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id BIGSERIAL PRIMARY KEY,
                owner_id BIGINT NOT NULL,
                message TEXT NOT NULL,
                created_at BIGINT NOT NULL
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
            VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = sequences.value + 1
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (short_code) DO NOTHING
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
            WHERE short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let facets = sqlx::query_as::<_, FacetRow>(
            "SELECT short_code, facet, value FROM link_facets WHERE short_code = $1",
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
            WHERE owner_id = $1
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
            WHERE l.owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows::assemble(links, facets))
    }

    async fn delete_by_code_and_owner(&self, short_code: &str, owner_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM links WHERE short_code = $1 AND owner_id = $2")
            .bind(short_code)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM link_facets WHERE short_code = $1")
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
                first_click_at = LEAST(COALESCE(first_click_at, $2), $2),
                last_click_at = GREATEST(COALESCE(last_click_at, $2), $2)
            WHERE short_code = $1
            "#,
        )
        .bind(short_code)
        .bind(metadata.clicked_at)
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
                VALUES ($1, $2, $3)
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
            "SELECT MAX(created_at) FROM feedback WHERE owner_id = $1",
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(latest)
    }

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        sqlx::query("INSERT INTO feedback (owner_id, message, created_at) VALUES ($1, $2, $3)")
            .bind(feedback.owner_id)
            .bind(&feedback.message)
            .bind(feedback.created_at)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }
}
