use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::findings::{
    CombinedJudgment, DetectedLabel, DetectorResult, Findings, LlmResult, ProviderStatus,
    ScopeAssessment, VisionJudgment, FINDINGS_VERSION,
};
use crate::models::photo::PhotoRecord;
use crate::services::label_detector::LabelDetection;
use crate::services::provider_error::ProviderError;
use crate::services::storage::{ImageSource, StorageError};
use crate::services::vision::VisionAnalysis;

/// Confidence reported when only the label detector succeeded.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Maximum entries in the combined summary label list.
const SUMMARY_LABEL_CAP: usize = 10;

/// Detector labels merged into the summary.
const DETECTOR_SUMMARY_TOP: usize = 5;

/// Detector labels passed to the vision prompt as hints.
const HINT_LABEL_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Run an extra detector call whose labels seed the vision prompt.
    pub hint_labels_enabled: bool,
    /// Delay before the hint call, giving the main detector call a head start.
    pub hint_head_start: Duration,
    /// Longest the vision call waits for the hint call once it is sent.
    pub hint_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            hint_labels_enabled: true,
            hint_head_start: Duration::from_millis(500),
            hint_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs both providers for one photo and merges whatever succeeded.
pub struct VisionOrchestrator {
    images: Arc<dyn ImageSource>,
    detector: Arc<dyn LabelDetection>,
    vision: Arc<dyn VisionAnalysis>,
    settings: OrchestratorSettings,
}

impl VisionOrchestrator {
    pub fn new(
        images: Arc<dyn ImageSource>,
        detector: Arc<dyn LabelDetection>,
        vision: Arc<dyn VisionAnalysis>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            images,
            detector,
            vision,
            settings,
        }
    }

    /// Analyze one photo. Fails only when the image cannot be loaded or both
    /// providers fail.
    pub async fn analyze(&self, photo: &PhotoRecord) -> Result<Findings, AnalysisError> {
        let image = self.images.fetch(&photo.storage_key).await?;
        let started = Instant::now();

        let detector_branch = async {
            let result = self.detector.detect_labels(&image).await;
            if let Err(ref e) = result {
                record_provider_failure("detector", e, photo);
            }
            result
        };

        let vision_branch = async {
            let hints = self.quick_hints(&image).await;
            let result = self.vision.analyze(&image, &photo.kind, &hints).await;
            if let Err(ref e) = result {
                record_provider_failure("vision", e, photo);
            }
            result
        };

        // Both branches always run to completion.
        let (detector, vision) = tokio::join!(detector_branch, vision_branch);

        tracing::info!(
            photo_id = %photo.id,
            detector_ok = detector.is_ok(),
            vision_ok = vision.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Provider calls settled"
        );

        match (detector, vision) {
            (Err(detector), Err(vision)) => Err(AnalysisError::AllProvidersFailed { detector, vision }),
            (detector, vision) => Ok(build_findings(detector, vision)),
        }
    }

    /// Labels from a second detector call, sent after the head start and
    /// awaited for at most `hint_timeout`. Any failure or timeout yields no hints.
    async fn quick_hints(&self, image: &[u8]) -> Vec<String> {
        if !self.settings.hint_labels_enabled {
            return Vec::new();
        }

        tokio::time::sleep(self.settings.hint_head_start).await;

        match tokio::time::timeout(self.settings.hint_timeout, self.detector.detect_labels(image)).await {
            Ok(Ok(labels)) => labels
                .into_iter()
                .take(HINT_LABEL_COUNT)
                .map(|l| l.name)
                .collect(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Hint labels unavailable");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!("Hint labels timed out");
                Vec::new()
            }
        }
    }
}

fn record_provider_failure(provider: &'static str, error: &ProviderError, photo: &PhotoRecord) {
    let kind: &'static str = error.kind().into();
    metrics::counter!("provider_failures_total", "provider" => provider, "kind" => kind).increment(1);

    if error.needs_operator() {
        tracing::error!(
            alert = true,
            provider,
            kind,
            photo_id = %photo.id,
            error = %error,
            "Provider needs operator attention"
        );
    } else {
        tracing::warn!(provider, kind, photo_id = %photo.id, error = %error, "Provider call failed");
    }
}

/// Assemble the persisted envelope from per-provider outcomes.
pub fn build_findings(
    detector: Result<Vec<DetectedLabel>, ProviderError>,
    vision: Result<VisionJudgment, ProviderError>,
) -> Findings {
    let combined = combine(detector.as_deref().ok(), vision.as_ref().ok());

    let detector = match detector {
        Ok(labels) => DetectorResult {
            status: ProviderStatus::Ready,
            labels: Some(labels),
            error: None,
        },
        Err(e) => DetectorResult {
            status: ProviderStatus::Failed,
            labels: None,
            error: Some(e.to_string()),
        },
    };

    let llm = match vision {
        Ok(judgment) => LlmResult {
            status: ProviderStatus::Ready,
            result: Some(judgment),
            error: None,
        },
        Err(e) => LlmResult {
            status: ProviderStatus::Failed,
            result: None,
            error: Some(e.to_string()),
        },
    };

    Findings {
        version: FINDINGS_VERSION,
        detector,
        llm,
        combined,
    }
}

/// Deterministic combined judgment over whichever providers succeeded.
pub fn combine(detector: Option<&[DetectedLabel]>, vision: Option<&VisionJudgment>) -> CombinedJudgment {
    let confidence = match vision {
        Some(j) => (j.confidence * 0.9 + 0.1).clamp(0.0, 1.0),
        None => FALLBACK_CONFIDENCE,
    };

    let vision_labels = vision.map(|j| j.labels.as_slice()).unwrap_or_default();
    let detector_labels = detector
        .unwrap_or_default()
        .iter()
        .take(DETECTOR_SUMMARY_TOP)
        .map(|l| &l.name);

    let summary_labels = dedupe_labels(vision_labels.iter().chain(detector_labels), SUMMARY_LABEL_CAP);

    CombinedJudgment {
        confidence,
        summary_labels,
        needs_more_photos: vision.map(|j| j.needs_more_photos.clone()).unwrap_or_default(),
        scope: vision.map(|j| j.scope.clone()).unwrap_or_else(ScopeAssessment::default),
    }
}

/// Case-insensitive dedupe keeping the first spelling seen.
fn dedupe_labels<'a>(labels: impl Iterator<Item = &'a String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_lowercase()))
        .take(cap)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Failed to load photo bytes: {0}")]
    ImageFetch(#[from] StorageError),

    #[error("All providers failed (detector: {detector}; vision: {vision})")]
    AllProvidersFailed {
        detector: ProviderError,
        vision: ProviderError,
    },
}

impl AnalysisError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalysisError::ImageFetch(StorageError::NotFound(_)) => false,
            AnalysisError::ImageFetch(StorageError::Config(_)) => false,
            AnalysisError::ImageFetch(_) => true,
            AnalysisError::AllProvidersFailed { detector, vision } => {
                detector.is_retryable() || vision.is_retryable()
            }
        }
    }
}
