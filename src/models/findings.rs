use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Schema version written into every persisted findings payload.
pub const FINDINGS_VERSION: u32 = 1;

/// A single label returned by the label detector, confidence on a 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f64,
}

/// Per-provider outcome recorded in the findings envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderStatus {
    Ready,
    Failed,
}

/// Estimated extent of the work shown in the photo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Spot,
    Partial,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(length(max = 1000))]
    #[serde(default)]
    pub notes: Option<String>,
}

/// Scope ambiguity metadata used to drive proposal tier selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScopeAssessment {
    #[garde(skip)]
    pub needs_clarification: bool,

    #[garde(length(max = 20), inner(length(min = 1, max = 500)))]
    #[serde(default)]
    pub clarification_reasons: Vec<String>,

    #[garde(length(max = 10), inner(length(min = 1, max = 200)))]
    #[serde(default)]
    pub suggested_tiers: Vec<String>,

    #[garde(length(min = 1, max = 100))]
    #[serde(default)]
    pub trade_category: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub severity: Option<Severity>,
}

/// Structured judgment produced by the multimodal vision model.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisionJudgment {
    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    #[garde(length(max = 50), inner(length(min = 1, max = 200)))]
    pub labels: Vec<String>,

    #[garde(length(max = 50), dive)]
    pub objects: Vec<DetectedObject>,

    #[garde(length(max = 50), inner(length(min = 1, max = 200)))]
    pub materials: Vec<String>,

    #[garde(length(max = 50), inner(length(min = 1, max = 500)))]
    pub damage: Vec<String>,

    #[garde(length(max = 50), inner(length(min = 1, max = 500)))]
    pub issues: Vec<String>,

    /// Best-effort measurements as free text, e.g. "approx. 4ft x 6ft".
    #[garde(length(max = 50), inner(length(min = 1, max = 200)))]
    pub measurements: Vec<String>,

    #[garde(length(max = 20), inner(length(min = 1, max = 500)))]
    pub needs_more_photos: Vec<String>,

    #[garde(dive)]
    pub scope: ScopeAssessment,
}

impl VisionJudgment {
    /// Trim free text and drop blank entries. A blank trade category or note
    /// is treated as absent rather than failing validation.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.labels,
            &mut self.materials,
            &mut self.damage,
            &mut self.issues,
            &mut self.measurements,
            &mut self.needs_more_photos,
            &mut self.scope.clarification_reasons,
            &mut self.scope.suggested_tiers,
        ] {
            clean_list(list);
        }

        for object in &mut self.objects {
            object.name = object.name.trim().to_string();
            clean_optional(&mut object.notes);
        }
        self.objects.retain(|o| !o.name.is_empty());

        clean_optional(&mut self.scope.trade_category);
    }
}

fn clean_list(list: &mut Vec<String>) {
    *list = list
        .drain(..)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
}

fn clean_optional(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectorResult {
    pub status: ProviderStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub labels: Option<Vec<DetectedLabel>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmResult {
    pub status: ProviderStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<VisionJudgment>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Orchestrator-computed summary read by downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CombinedJudgment {
    pub confidence: f64,
    pub summary_labels: Vec<String>,
    pub needs_more_photos: Vec<String>,
    pub scope: ScopeAssessment,
}

/// Versioned findings envelope persisted on the photo record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Findings {
    pub version: u32,
    pub detector: DetectorResult,
    pub llm: LlmResult,
    pub combined: CombinedJudgment,
}
