use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::findings::CombinedJudgment;
use super::photo::{FindingsStatus, PhotoRecord};

/// Metadata accompanying an uploaded photo (multipart text fields).
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitPhotoRequest {
    /// Capture kind hint passed to the vision model, e.g. "site" or "before".
    #[garde(length(min = 1, max = 50), custom(is_kind_slug))]
    pub kind: String,
}

fn is_kind_slug(value: &str, _context: &()) -> garde::Result {
    let mut chars = value.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    if starts_alpha && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        Ok(())
    } else {
        Err(garde::Error::new("kind must be a lowercase slug"))
    }
}

impl Default for SubmitPhotoRequest {
    fn default() -> Self {
        Self {
            kind: "site".to_string(),
        }
    }
}

/// Response after recording a new photo for analysis.
#[derive(Debug, Serialize)]
pub struct PhotoSubmittedResponse {
    pub photo_id: Uuid,
    pub status: FindingsStatus,
    pub message: String,
}

/// Response for querying a photo's analysis state.
///
/// Only the combined judgment is exposed; provider output and error text stay
/// on the record.
#[derive(Debug, Serialize)]
pub struct PhotoStatusResponse {
    pub photo_id: Uuid,
    pub job_id: Uuid,
    pub status: FindingsStatus,
    pub attempts: i32,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub combined: Option<CombinedJudgment>,
}

impl PhotoStatusResponse {
    pub fn from_record(record: &PhotoRecord) -> Self {
        let combined = match record.findings_status {
            FindingsStatus::Ready => record
                .findings
                .as_ref()
                .and_then(|f| f.get("combined"))
                .and_then(|c| serde_json::from_value(c.clone()).ok()),
            _ => None,
        };

        Self {
            photo_id: record.id,
            job_id: record.job_id,
            status: record.findings_status,
            attempts: record.attempts,
            analyzed_at: record.analyzed_at,
            combined,
        }
    }
}
