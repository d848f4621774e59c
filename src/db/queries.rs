use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{PhotoStore, StoreError};
use crate::models::photo::{FindingsStatus, NewPhoto, PhotoRecord};

const PHOTO_COLUMNS: &str = "id, job_id, storage_key, kind, findings, findings_status, attempts, \
     next_attempt_at, locked_by, locked_at, analyzed_at, error, created_at";

/// PostgreSQL-backed photo record store.
#[derive(Clone)]
pub struct PgPhotoStore {
    pool: PgPool,
}

impl PgPhotoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn photo_from_row(row: &PgRow) -> Result<PhotoRecord, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status_str: String = row.try_get("findings_status")?;
    let findings_status = FindingsStatus::from_str(&status_str).map_err(|_| StoreError::Decode {
        id,
        reason: format!("unknown findings_status '{}'", status_str),
    })?;

    Ok(PhotoRecord {
        id,
        job_id: row.try_get("job_id")?,
        storage_key: row.try_get("storage_key")?,
        kind: row.try_get("kind")?,
        findings: row.try_get("findings")?,
        findings_status,
        attempts: row.try_get("attempts")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        analyzed_at: row.try_get("analyzed_at")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn ensure_updated(id: Uuid, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::NotFound(id))
    } else {
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for PgPhotoStore {
    async fn insert_pending(&self, photo: NewPhoto) -> Result<PhotoRecord, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO photos (id, job_id, storage_key, kind, findings_status, attempts)
            VALUES ($1, $2, $3, $4, 'pending', 0)
            RETURNING {PHOTO_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(photo.job_id)
            .bind(&photo.storage_key)
            .bind(&photo.kind)
            .fetch_one(&self.pool)
            .await?;

        photo_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>, StoreError> {
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = $1");

        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(photo_from_row).transpose()
    }

    async fn select_claimable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lock_expiry: Duration,
    ) -> Result<Vec<PhotoRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PHOTO_COLUMNS}
            FROM photos
            WHERE (findings_status = 'pending'
                   AND (next_attempt_at IS NULL OR next_attempt_at <= $1))
               OR (findings_status = 'processing' AND locked_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(now - lock_expiry)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(photo_from_row).collect()
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        lock_expiry: Duration,
    ) -> Result<Option<PhotoRecord>, StoreError> {
        // Single conditional UPDATE; Postgres re-checks the WHERE clause
        // against the latest row version, so only one claimer wins.
        let sql = format!(
            r#"
            UPDATE photos
            SET findings_status = 'processing',
                locked_by = $2,
                locked_at = $3,
                attempts = attempts + 1,
                next_attempt_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND ((findings_status = 'pending'
                    AND (next_attempt_at IS NULL OR next_attempt_at <= $3))
                   OR findings_status = 'processing')
              AND (locked_at IS NULL OR locked_at < $4)
            RETURNING {PHOTO_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .bind(now - lock_expiry)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(photo_from_row).transpose()
    }

    async fn mark_ready(
        &self,
        id: Uuid,
        findings: &serde_json::Value,
        analyzed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET findings_status = 'ready',
                findings = $2,
                analyzed_at = $3,
                error = NULL,
                next_attempt_at = NULL,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(findings)
        .bind(analyzed_at)
        .execute(&self.pool)
        .await?;

        ensure_updated(id, result.rows_affected())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET findings_status = 'pending',
                error = $2,
                next_attempt_at = $3,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        ensure_updated(id, result.rows_affected())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET findings_status = 'failed',
                error = $2,
                next_attempt_at = NULL,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        ensure_updated(id, result.rows_affected())
    }

    async fn request_reanalysis(&self, id: Uuid) -> Result<Option<PhotoRecord>, StoreError> {
        let sql = format!(
            r#"
            UPDATE photos
            SET findings_status = 'pending',
                attempts = 0,
                next_attempt_at = NULL,
                locked_by = NULL,
                locked_at = NULL,
                error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND findings_status IN ('ready', 'failed')
            RETURNING {PHOTO_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(photo_from_row).transpose()
    }
}
