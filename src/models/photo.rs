use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Analysis state of a photo record.
///
/// `Ready` and `Failed` are terminal for the worker; only an explicit
/// re-analysis request moves a record back to `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FindingsStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl FindingsStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FindingsStatus::Ready | FindingsStatus::Failed)
    }
}

/// A persisted photo awaiting or holding analysis findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Object storage key of the raw image bytes.
    pub storage_key: String,
    /// Capture kind hint, e.g. "site" or "before".
    pub kind: String,
    pub findings: Option<serde_json::Value>,
    pub findings_status: FindingsStatus,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the uploader when a photo is first recorded.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub job_id: Uuid,
    pub storage_key: String,
    pub kind: String,
}
