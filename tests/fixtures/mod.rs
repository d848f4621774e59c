//! Image bytes and model outputs shared by the pipeline tests

use photo_findings::models::findings::{
    DetectedLabel, DetectedObject, ScopeAssessment, Severity, VisionJudgment,
};

/// Minimal JPEG header; enough for magic-byte sniffing.
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

pub fn detector_labels() -> Vec<DetectedLabel> {
    [
        ("Bathroom", 99.1),
        ("Tile", 97.4),
        ("Shower", 95.0),
        ("Mold", 88.2),
        ("Grout", 84.0),
        ("Towel", 79.5),
        ("Mirror", 75.0),
    ]
    .iter()
    .map(|(name, confidence)| DetectedLabel {
        name: name.to_string(),
        confidence: *confidence,
    })
    .collect()
}

pub fn vision_judgment() -> VisionJudgment {
    VisionJudgment {
        confidence: 0.85,
        labels: ["shower", "tile", "caulk", "mold", "grout", "drain", "niche", "valve"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        objects: vec![DetectedObject {
            name: "shower valve".to_string(),
            notes: Some("single-handle, chrome".to_string()),
        }],
        materials: vec!["ceramic tile".to_string()],
        damage: vec!["mold in grout lines".to_string()],
        issues: vec!["failed caulk at tub edge".to_string()],
        measurements: vec!["surround approx. 5ft x 8ft".to_string()],
        needs_more_photos: vec!["close-up of the tile behind the valve".to_string()],
        scope: ScopeAssessment {
            needs_clarification: true,
            clarification_reasons: vec!["substrate condition unknown".to_string()],
            suggested_tiers: vec!["regrout".to_string(), "full retile".to_string()],
            trade_category: Some("tile".to_string()),
            severity: Some(Severity::Partial),
        },
    }
}
