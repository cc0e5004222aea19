use crate::{
    analytics::BucketWidth,
    error::StoreError,
    models::{ClickBucket, NewLink, ShortLink},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;

// ── Store contract ─────────────────────────────────────────────────────────

/// The authoritative persistent store. Every method is a single statement;
/// callers never rely on multi-row transactions.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Insert a new row. Fails with [`StoreError::UniqueViolation`] when the
    /// code is already held by any row, expired or not.
    async fn create_link(&self, link: NewLink<'_>) -> Result<ShortLink, StoreError>;

    /// Fetch a link by code, excluding rows whose expiry is at or before `now`.
    async fn find_active_link_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ShortLink>, StoreError>;

    /// Fetch a link by code including expired rows, optionally scoped to an owner.
    async fn find_link_by_code(
        &self,
        code: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<ShortLink>, StoreError>;

    async fn increment_click_count(&self, code: &str) -> Result<bool, StoreError>;

    async fn append_click_event(&self, link_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete a link (click events cascade). Returns `false` when nothing matched.
    async fn delete_link(&self, code: &str, owner_id: Option<&str>) -> Result<bool, StoreError>;

    async fn update_expiry(
        &self,
        code: &str,
        owner_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// All links belonging to `owner_id`, newest first.
    async fn list_links_by_owner(&self, owner_id: &str) -> Result<Vec<ShortLink>, StoreError>;

    /// Sparse per-bucket click counts for events at or after `since`,
    /// ascending by bucket start.
    async fn query_click_buckets(
        &self,
        link_id: i64,
        since: DateTime<Utc>,
        width: BucketWidth,
    ) -> Result<Vec<ClickBucket>, StoreError>;

    /// Remove the row holding `code` only if it has expired by `now`.
    async fn purge_expired_code(&self, code: &str, now: DateTime<Utc>)
        -> Result<bool, StoreError>;
}

// ── SQLite implementation ──────────────────────────────────────────────────

/// Open a WAL-mode SQLite pool with foreign keys enforced, creating the
/// database file when missing.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            SqliteConnectOptions::from_str(database_url)?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true),
        )
        .await
}

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A private in-memory database with the schema applied. A single
    /// connection that never idles out keeps the database alive.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded migrations in `migrations/`.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn create_link(&self, link: NewLink<'_>) -> Result<ShortLink, StoreError> {
        let id = sqlx::query(
            "INSERT INTO links (code, target, owner_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(link.code)
        .bind(link.target)
        .bind(link.owner_id)
        .bind(Utc::now())
        .bind(link.expires_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let link: ShortLink = sqlx::query_as(
            "SELECT id, code, target, owner_id, click_count, created_at, expires_at
             FROM links WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(link)
    }

    async fn find_active_link_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ShortLink>, StoreError> {
        let link: Option<ShortLink> = sqlx::query_as(
            "SELECT id, code, target, owner_id, click_count, created_at, expires_at
             FROM links
             WHERE code = ?1
               AND (expires_at IS NULL OR julianday(expires_at) > julianday(?2))",
        )
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn find_link_by_code(
        &self,
        code: &str,
        owner_id: Option<&str>,
    ) -> Result<Option<ShortLink>, StoreError> {
        let link: Option<ShortLink> = sqlx::query_as(
            "SELECT id, code, target, owner_id, click_count, created_at, expires_at
             FROM links
             WHERE code = ?1 AND (?2 IS NULL OR owner_id = ?2)",
        )
        .bind(code)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn increment_click_count(&self, code: &str) -> Result<bool, StoreError> {
        let affected = sqlx::query("UPDATE links SET click_count = click_count + 1 WHERE code = ?1")
            .bind(code)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn append_click_event(&self, link_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO click_events (link_id, occurred_at) VALUES (?1, ?2)")
            .bind(link_id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_link(&self, code: &str, owner_id: Option<&str>) -> Result<bool, StoreError> {
        let affected = sqlx::query("DELETE FROM links WHERE code = ?1 AND (?2 IS NULL OR owner_id = ?2)")
            .bind(code)
            .bind(owner_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn update_expiry(
        &self,
        code: &str,
        owner_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let affected =
            sqlx::query("UPDATE links SET expires_at = ?1 WHERE code = ?2 AND owner_id = ?3")
                .bind(expires_at)
                .bind(code)
                .bind(owner_id)
                .execute(&self.pool)
                .await?
                .rows_affected();

        Ok(affected > 0)
    }

    async fn list_links_by_owner(&self, owner_id: &str) -> Result<Vec<ShortLink>, StoreError> {
        let links: Vec<ShortLink> = sqlx::query_as(
            "SELECT id, code, target, owner_id, click_count, created_at, expires_at
             FROM links
             WHERE owner_id = ?1
             ORDER BY created_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    async fn query_click_buckets(
        &self,
        link_id: i64,
        since: DateTime<Utc>,
        width: BucketWidth,
    ) -> Result<Vec<ClickBucket>, StoreError> {
        // Every width divides a UTC day, so flooring epoch seconds lands on
        // calendar boundaries (:00/:10/..., 00:00/06:00/..., midnight).
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT (CAST(strftime('%s', occurred_at) AS INTEGER) / ?2) * ?2 AS bucket,
                    COUNT(*) AS click_count
             FROM click_events
             WHERE link_id = ?1 AND julianday(occurred_at) >= julianday(?3)
             GROUP BY bucket
             ORDER BY bucket ASC",
        )
        .bind(link_id)
        .bind(width.seconds())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let buckets = rows
            .into_iter()
            .filter_map(|(bucket, count)| {
                DateTime::from_timestamp(bucket, 0).map(|bucket_start| ClickBucket {
                    bucket_start,
                    count,
                })
            })
            .collect();

        Ok(buckets)
    }

    async fn purge_expired_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            "DELETE FROM links
             WHERE code = ?1 AND expires_at IS NOT NULL AND julianday(expires_at) <= julianday(?2)",
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected > 0)
    }
}
