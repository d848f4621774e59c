//! Fake providers and worker wiring for pipeline tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use photo_findings::db::memory::MemoryPhotoStore;
use photo_findings::models::findings::{DetectedLabel, VisionJudgment};
use photo_findings::services::label_detector::LabelDetection;
use photo_findings::services::orchestrator::{OrchestratorSettings, VisionOrchestrator};
use photo_findings::services::provider_error::ProviderError;
use photo_findings::services::storage::{ImageSource, StorageError};
use photo_findings::services::vision::VisionAnalysis;
use photo_findings::services::worker::{Worker, WorkerId, WorkerSettings};

use crate::fixtures::JPEG_BYTES;

pub struct StaticImages;

#[async_trait]
impl ImageSource for StaticImages {
    async fn fetch(&self, _storage_key: &str) -> Result<Vec<u8>, StorageError> {
        Ok(JPEG_BYTES.to_vec())
    }
}

/// Label detector that always answers the same way.
pub struct FakeDetector {
    labels: Option<Vec<DetectedLabel>>,
    error: fn() -> ProviderError,
    pub calls: AtomicUsize,
}

impl FakeDetector {
    pub fn ok(labels: Vec<DetectedLabel>) -> Self {
        Self {
            labels: Some(labels),
            error: || ProviderError::EmptyResponse,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: fn() -> ProviderError) -> Self {
        Self {
            labels: None,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LabelDetection for FakeDetector {
    async fn detect_labels(&self, _image: &[u8]) -> Result<Vec<DetectedLabel>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.labels.clone().ok_or_else(self.error)
    }
}

/// Vision model that always answers the same way.
pub struct FakeVision {
    judgment: Option<VisionJudgment>,
    error: fn() -> ProviderError,
    delay: Duration,
}

impl FakeVision {
    pub fn ok(judgment: VisionJudgment) -> Self {
        Self {
            judgment: Some(judgment),
            error: || ProviderError::EmptyResponse,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(error: fn() -> ProviderError) -> Self {
        Self {
            judgment: None,
            error,
            delay: Duration::ZERO,
        }
    }

    /// Hold each call open, to widen race windows between workers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl VisionAnalysis for FakeVision {
    async fn analyze(
        &self,
        _image: &[u8],
        _kind: &str,
        _label_hints: &[String],
    ) -> Result<VisionJudgment, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.judgment.clone().ok_or_else(self.error)
    }
}

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(10),
        ..WorkerSettings::default()
    }
}

pub fn build_worker(
    id: &str,
    store: Arc<MemoryPhotoStore>,
    detector: Arc<FakeDetector>,
    vision: Arc<FakeVision>,
) -> Worker {
    let orchestrator = VisionOrchestrator::new(
        Arc::new(StaticImages),
        detector,
        vision,
        OrchestratorSettings {
            hint_labels_enabled: false,
            hint_head_start: Duration::from_millis(50),
            hint_timeout: Duration::from_millis(200),
        },
    );

    Worker::new(WorkerId::new(id), store, Arc::new(orchestrator), settings())
}
