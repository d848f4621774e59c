use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PhotoStore, StoreError};
use crate::models::photo::{FindingsStatus, NewPhoto, PhotoRecord};

/// In-process photo store. Every operation runs under one mutex, which gives
/// `claim` the same compare-and-update atomicity as the SQL version.
#[derive(Default)]
pub struct MemoryPhotoStore {
    photos: Mutex<HashMap<Uuid, PhotoRecord>>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, for seeding state.
    pub async fn put(&self, record: PhotoRecord) {
        self.photos.lock().await.insert(record.id, record);
    }
}

fn is_claimable(photo: &PhotoRecord, now: DateTime<Utc>, lock_expiry: Duration) -> bool {
    let lock_free = photo.locked_at.map_or(true, |at| at < now - lock_expiry);
    let due = match photo.findings_status {
        FindingsStatus::Pending => photo.next_attempt_at.map_or(true, |at| at <= now),
        FindingsStatus::Processing => true,
        FindingsStatus::Ready | FindingsStatus::Failed => false,
    };
    due && lock_free
}

#[async_trait]
impl PhotoStore for MemoryPhotoStore {
    async fn insert_pending(&self, photo: NewPhoto) -> Result<PhotoRecord, StoreError> {
        let record = PhotoRecord {
            id: Uuid::new_v4(),
            job_id: photo.job_id,
            storage_key: photo.storage_key,
            kind: photo.kind,
            findings: None,
            findings_status: FindingsStatus::Pending,
            attempts: 0,
            next_attempt_at: None,
            locked_by: None,
            locked_at: None,
            analyzed_at: None,
            error: None,
            created_at: Utc::now(),
        };
        self.photos.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PhotoRecord>, StoreError> {
        Ok(self.photos.lock().await.get(&id).cloned())
    }

    async fn select_claimable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        lock_expiry: Duration,
    ) -> Result<Vec<PhotoRecord>, StoreError> {
        let photos = self.photos.lock().await;
        let mut candidates: Vec<PhotoRecord> = photos
            .values()
            .filter(|p| is_claimable(p, now, lock_expiry))
            .cloned()
            .collect();

        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        candidates.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(candidates)
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        lock_expiry: Duration,
    ) -> Result<Option<PhotoRecord>, StoreError> {
        let mut photos = self.photos.lock().await;
        let Some(photo) = photos.get_mut(&id) else {
            return Ok(None);
        };
        if !is_claimable(photo, now, lock_expiry) {
            return Ok(None);
        }

        photo.findings_status = FindingsStatus::Processing;
        photo.locked_by = Some(worker_id.to_string());
        photo.locked_at = Some(now);
        photo.attempts += 1;
        photo.next_attempt_at = None;
        Ok(Some(photo.clone()))
    }

    async fn mark_ready(
        &self,
        id: Uuid,
        findings: &serde_json::Value,
        analyzed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut photos = self.photos.lock().await;
        let photo = photos.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        photo.findings_status = FindingsStatus::Ready;
        photo.findings = Some(findings.clone());
        photo.analyzed_at = Some(analyzed_at);
        photo.error = None;
        photo.next_attempt_at = None;
        photo.locked_by = None;
        photo.locked_at = None;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut photos = self.photos.lock().await;
        let photo = photos.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        photo.findings_status = FindingsStatus::Pending;
        photo.error = Some(error.to_string());
        photo.next_attempt_at = Some(next_attempt_at);
        photo.locked_by = None;
        photo.locked_at = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut photos = self.photos.lock().await;
        let photo = photos.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        photo.findings_status = FindingsStatus::Failed;
        photo.error = Some(error.to_string());
        photo.next_attempt_at = None;
        photo.locked_by = None;
        photo.locked_at = None;
        Ok(())
    }

    async fn request_reanalysis(&self, id: Uuid) -> Result<Option<PhotoRecord>, StoreError> {
        let mut photos = self.photos.lock().await;
        let Some(photo) = photos.get_mut(&id) else {
            return Ok(None);
        };
        if !photo.findings_status.is_terminal() {
            return Ok(None);
        }

        photo.findings_status = FindingsStatus::Pending;
        photo.attempts = 0;
        photo.next_attempt_at = None;
        photo.locked_by = None;
        photo.locked_at = None;
        photo.error = None;
        Ok(Some(photo.clone()))
    }
}
