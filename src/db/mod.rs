use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::models::photo::{NewPhoto, PhotoRecord};

pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .idle_timeout(std::time::Duration::from_secs(600))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persisted per-photo analysis state.
///
/// `claim` must be an atomic compare-and-update: of any number of concurrent
/// callers for the same row, at most one may observe `Some`.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Record a newly uploaded photo in `pending`.
    async fn insert_pending(&self, photo: NewPhoto) -> Result<PhotoRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>, StoreError>;

    /// Newest-first candidates: due `pending` rows, plus `processing` rows
    /// whose lock is older than `lock_expiry`.
    async fn select_claimable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lock_expiry: Duration,
    ) -> Result<Vec<PhotoRecord>, StoreError>;

    /// Take ownership of a record, bumping `attempts`. `None` means another
    /// worker holds a live lock or the record is no longer claimable.
    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        lock_expiry: Duration,
    ) -> Result<Option<PhotoRecord>, StoreError>;

    async fn mark_ready(
        &self,
        id: Uuid,
        findings: &serde_json::Value,
        analyzed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Reset a `ready` or `failed` record to `pending` for a fresh analysis.
    /// Returns `None` when the record is missing or still in flight.
    async fn request_reanalysis(&self, id: Uuid) -> Result<Option<PhotoRecord>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid photo record {id}: {reason}")]
    Decode { id: Uuid, reason: String },

    #[error("Photo not found: {0}")]
    NotFound(Uuid),
}
