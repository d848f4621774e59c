use serde::Deserialize;
use std::num::NonZeroU16;
use std::time::Duration;

use crate::services::label_detector::DetectorSettings;
use crate::services::orchestrator::OrchestratorSettings;
use crate::services::worker::{WorkerId, WorkerSettings};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Label detection endpoint (full URL of the detect call)
    pub detector_endpoint: String,

    /// Label detection API key
    pub detector_api_key: String,

    #[serde(default = "default_detector_max_labels")]
    pub detector_max_labels: usize,

    /// Minimum label confidence kept, on the provider's 0-100 scale
    #[serde(default = "default_detector_min_confidence")]
    pub detector_min_confidence: f64,

    /// Base URL of the OpenAI-compatible vision API
    #[serde(default = "default_vision_api_base")]
    pub vision_api_base: String,

    pub vision_api_key: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Candidates fetched per loop iteration; zero is rejected at load time
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: NonZeroU16,

    /// Age after which an unreleased claim may be taken over by another worker
    #[serde(default = "default_lock_expiry_secs")]
    pub lock_expiry_secs: u64,

    /// Delay before the extra detector call used for prompt hints
    #[serde(default = "default_hint_head_start_ms")]
    pub hint_head_start_ms: u64,

    /// How long the vision call waits for the hint labels once requested
    #[serde(default = "default_hint_timeout_ms")]
    pub hint_timeout_ms: u64,

    /// Set to false to skip the extra detector call used for prompt hints
    #[serde(default = "default_true")]
    pub hint_labels_enabled: bool,

    /// Address for the worker's Prometheus scrape endpoint. Disabled when unset.
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,

    /// Worker identity. Generated at startup when unset.
    #[serde(default)]
    pub worker_id: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_detector_max_labels() -> usize {
    20
}

fn default_detector_min_confidence() -> f64 {
    70.0
}

fn default_vision_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_vision_timeout_secs() -> u64 {
    60
}

fn default_worker_poll_interval_ms() -> u64 {
    300
}

fn default_worker_batch_size() -> NonZeroU16 {
    NonZeroU16::MIN.saturating_add(4)
}

fn default_lock_expiry_secs() -> u64 {
    120
}

fn default_hint_head_start_ms() -> u64 {
    500
}

fn default_hint_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            max_labels: self.detector_max_labels,
            min_confidence: self.detector_min_confidence,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            hint_labels_enabled: self.hint_labels_enabled,
            hint_head_start: Duration::from_millis(self.hint_head_start_ms),
            hint_timeout: Duration::from_millis(self.hint_timeout_ms),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms),
            batch_size: i64::from(self.worker_batch_size.get()),
            lock_expiry: chrono::Duration::seconds(self.lock_expiry_secs as i64),
        }
    }

    /// Configured worker identity, or a fresh one for this process.
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
            .clone()
            .map(WorkerId::new)
            .unwrap_or_else(WorkerId::generate)
    }
}
