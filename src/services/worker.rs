use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{PhotoStore, StoreError};
use crate::models::photo::PhotoRecord;
use crate::services::backoff::{self, RetryDecision};
use crate::services::orchestrator::VisionOrchestrator;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sleep between loop iterations.
    pub poll_interval: Duration,
    /// Candidates fetched per iteration.
    pub batch_size: i64,
    /// Age after which another worker may take over a claim.
    pub lock_expiry: chrono::Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            batch_size: 5,
            lock_expiry: chrono::Duration::minutes(2),
        }
    }
}

/// Identity written into `locked_by`, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("worker-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a processed photo was transitioned to.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoOutcome {
    Ready,
    Retry { next_attempt_at: DateTime<Utc> },
    Failed,
}

/// Polls the store, claims one photo at a time and records the outcome.
pub struct Worker {
    id: WorkerId,
    store: Arc<dyn PhotoStore>,
    orchestrator: Arc<VisionOrchestrator>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        store: Arc<dyn PhotoStore>,
        orchestrator: Arc<VisionOrchestrator>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            store,
            orchestrator,
            settings,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Run until `shutdown` is cancelled. A photo already claimed is finished
    /// before the loop exits; errors are logged and never end the loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(worker_id = %self.id, "Worker loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            match self.tick(Utc::now()).await {
                Ok(Some((photo_id, outcome))) => {
                    tracing::debug!(%photo_id, ?outcome, "Iteration processed a photo");
                }
                Ok(None) => {
                    tracing::trace!("No claimable photos");
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Worker iteration failed");
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Worker loop stopped");
    }

    /// One loop iteration: claim at most one photo and process it.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<(Uuid, PhotoOutcome)>, WorkerError> {
        let candidates = self
            .store
            .select_claimable(self.settings.batch_size, now, self.settings.lock_expiry)
            .await?;

        for candidate in candidates {
            let claimed = self
                .store
                .claim(candidate.id, self.id.as_str(), now, self.settings.lock_expiry)
                .await?;

            match claimed {
                Some(photo) => {
                    metrics::counter!("photo_claims_total").increment(1);
                    tracing::info!(
                        photo_id = %photo.id,
                        worker_id = %self.id,
                        attempts = photo.attempts,
                        "Claimed photo"
                    );
                    let outcome = self.process(&photo, now).await?;
                    return Ok(Some((photo.id, outcome)));
                }
                None => {
                    metrics::counter!("photo_claim_conflicts_total").increment(1);
                    tracing::debug!(photo_id = %candidate.id, "Photo claimed by another worker");
                }
            }
        }

        Ok(None)
    }

    async fn process(&self, photo: &PhotoRecord, now: DateTime<Utc>) -> Result<PhotoOutcome, WorkerError> {
        let start = Instant::now();
        let result = self.orchestrator.analyze(photo).await;
        let elapsed = start.elapsed();
        metrics::histogram!("photo_analysis_seconds").record(elapsed.as_secs_f64());
        let finished_at = now + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        match result {
            Ok(findings) => {
                let payload = serde_json::to_value(&findings)?;
                self.store.mark_ready(photo.id, &payload, finished_at).await?;
                metrics::counter!("photo_findings_ready_total").increment(1);

                tracing::info!(
                    photo_id = %photo.id,
                    attempts = photo.attempts,
                    confidence = findings.combined.confidence,
                    labels = findings.combined.summary_labels.len(),
                    "Photo findings ready"
                );
                Ok(PhotoOutcome::Ready)
            }
            Err(e) if !e.is_retryable() => {
                self.store.mark_failed(photo.id, &e.to_string()).await?;
                metrics::counter!("photo_findings_failed_total").increment(1);

                tracing::error!(
                    alert = true,
                    photo_id = %photo.id,
                    attempts = photo.attempts,
                    error = %e,
                    "Photo analysis failed with a non-retryable error"
                );
                Ok(PhotoOutcome::Failed)
            }
            Err(e) => match backoff::next_retry(photo.attempts, finished_at) {
                RetryDecision::RetryAt(next_attempt_at) => {
                    self.store
                        .mark_retry(photo.id, &e.to_string(), next_attempt_at)
                        .await?;
                    metrics::counter!("photo_findings_retry_total").increment(1);

                    tracing::warn!(
                        photo_id = %photo.id,
                        attempts = photo.attempts,
                        %next_attempt_at,
                        error = %e,
                        "Photo analysis failed, scheduled retry"
                    );
                    Ok(PhotoOutcome::Retry { next_attempt_at })
                }
                RetryDecision::GiveUp => {
                    self.store.mark_failed(photo.id, &e.to_string()).await?;
                    metrics::counter!("photo_findings_failed_total").increment(1);

                    tracing::warn!(
                        photo_id = %photo.id,
                        attempts = photo.attempts,
                        error = %e,
                        "Photo analysis failed after max attempts"
                    );
                    Ok(PhotoOutcome::Failed)
                }
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Photo store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to serialize findings: {0}")]
    Serialize(#[from] serde_json::Error),
}
