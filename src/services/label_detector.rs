use async_trait::async_trait;
use base64::Engine;
use image::ImageFormat;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::models::findings::DetectedLabel;
use crate::services::provider_error::{classify_http_failure, ProviderError};

/// General-purpose object/label detection.
#[async_trait]
pub trait LabelDetection: Send + Sync {
    /// Labels sorted by descending confidence (0-100).
    async fn detect_labels(&self, image: &[u8]) -> Result<Vec<DetectedLabel>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub max_labels: usize,
    /// Minimum confidence on the provider's 0-100 scale.
    pub min_confidence: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            max_labels: 20,
            min_confidence: 70.0,
        }
    }
}

/// HTTP client for the label detection provider.
pub struct LabelDetectorClient {
    http: Client,
    endpoint: String,
    api_key: String,
    settings: DetectorSettings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest {
    image: DetectImage,
    max_labels: usize,
    min_confidence: f64,
}

#[derive(Serialize)]
struct DetectImage {
    bytes: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(alias = "Labels", default)]
    labels: Vec<RawLabel>,
}

#[derive(Deserialize)]
struct RawLabel {
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "Confidence")]
    confidence: f64,
}

impl LabelDetectorClient {
    pub fn new(endpoint: &str, api_key: &str, settings: DetectorSettings) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            settings,
        })
    }
}

#[async_trait]
impl LabelDetection for LabelDetectorClient {
    async fn detect_labels(&self, image: &[u8]) -> Result<Vec<DetectedLabel>, ProviderError> {
        // Reject before paying for a call the provider would refuse.
        let format = sniff_supported_format(image)?;
        tracing::debug!(?format, bytes = image.len(), "Calling label detector");

        let request = DetectRequest {
            image: DetectImage {
                bytes: base64::engine::general_purpose::STANDARD.encode(image),
            },
            max_labels: self.settings.max_labels,
            min_confidence: self.settings.min_confidence,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if status == StatusCode::BAD_REQUEST && body.contains("InvalidImageFormat") {
                return Err(ProviderError::UnsupportedFormat(format!("{:?}", format)));
            }
            return Err(classify_http_failure(status, &body));
        }

        if body.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        let parsed: DetectResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(normalize_labels(parsed.labels, &self.settings))
    }
}

/// Accept only the two encodings the detector supports, by magic bytes.
pub fn sniff_supported_format(image: &[u8]) -> Result<ImageFormat, ProviderError> {
    match image::guess_format(image) {
        Ok(ImageFormat::Jpeg) => Ok(ImageFormat::Jpeg),
        Ok(ImageFormat::Png) => Ok(ImageFormat::Png),
        Ok(other) => Err(ProviderError::UnsupportedFormat(format!("{:?}", other))),
        Err(_) if is_heif(image) => Err(ProviderError::UnsupportedFormat("HEIF".to_string())),
        Err(_) => Err(ProviderError::UnsupportedFormat("unrecognized".to_string())),
    }
}

pub(crate) fn is_heif(image: &[u8]) -> bool {
    const BRANDS: &[&[u8; 4]] = &[b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1"];
    image.len() >= 12
        && &image[4..8] == b"ftyp"
        && BRANDS.iter().any(|b| &image[8..12] == b.as_slice())
}

fn normalize_labels(raw: Vec<RawLabel>, settings: &DetectorSettings) -> Vec<DetectedLabel> {
    let mut labels: Vec<DetectedLabel> = raw
        .into_iter()
        .filter(|l| !l.name.trim().is_empty() && l.confidence.is_finite())
        .map(|l| DetectedLabel {
            name: l.name.trim().to_string(),
            confidence: l.confidence.clamp(0.0, 100.0),
        })
        .filter(|l| l.confidence >= settings.min_confidence)
        .collect();

    labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    labels.truncate(settings.max_labels);
    labels
}
