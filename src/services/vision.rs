use async_trait::async_trait;
use base64::Engine;
use garde::Validate;
use image::ImageFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::findings::VisionJudgment;
use crate::services::label_detector::is_heif;
use crate::services::provider_error::{classify_http_failure, ProviderError};

/// Multimodal model producing a structured judgment for one photo.
#[async_trait]
pub trait VisionAnalysis: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        kind: &str,
        label_hints: &[String],
    ) -> Result<VisionJudgment, ProviderError>;
}

/// Client for an OpenAI-compatible chat completions API with image input.
pub struct VisionClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

const SYSTEM_PROMPT: &str = concat!(
    "You are a construction estimator reviewing a single field photo for a repair or remodel proposal. ",
    "Identify visible objects, materials, damage and issues. Give measurements only when they can be ",
    "estimated from visible references. List follow-up photos that would remove doubt about the scope. ",
    "Set scope.needsClarification when the extent of work cannot be decided from this photo alone. ",
    "confidence is your overall certainty between 0 and 1."
);

impl VisionClient {
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body(&self, image: &[u8], kind: &str, label_hints: &[String]) -> Result<Value, ProviderError> {
        let image_url = data_url(image)?;

        Ok(json!({
            "model": self.model,
            "temperature": 0.2,
            "max_tokens": 1500,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "photo_findings",
                    "strict": true,
                    "schema": judgment_schema(),
                }
            },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_prompt(kind, label_hints) },
                        { "type": "image_url", "image_url": { "url": image_url, "detail": "high" } }
                    ]
                }
            ]
        }))
    }
}

#[async_trait]
impl VisionAnalysis for VisionClient {
    async fn analyze(
        &self,
        image: &[u8],
        kind: &str,
        label_hints: &[String],
    ) -> Result<VisionJudgment, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.request_body(image, kind, label_hints)?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_http_failure(status, &text));
        }

        parse_completion(&text)
    }
}

fn user_prompt(kind: &str, label_hints: &[String]) -> String {
    let mut prompt = format!("Photo kind: {}.", kind);
    if !label_hints.is_empty() {
        prompt.push_str(" An object detector suggested these labels (may be incomplete or wrong): ");
        prompt.push_str(&label_hints.join(", "));
        prompt.push('.');
    }
    prompt.push_str(" Respond with JSON matching the schema.");
    prompt
}

/// Inline the image so the provider never fetches a storage URL itself.
/// Only encodings the model accepts are sent, labelled by their magic bytes.
fn data_url(image: &[u8]) -> Result<String, ProviderError> {
    let format = match image::guess_format(image) {
        Ok(f @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif)) => f,
        Ok(other) => return Err(ProviderError::UnsupportedFormat(format!("{:?}", other))),
        Err(_) if is_heif(image) => return Err(ProviderError::UnsupportedFormat("HEIF".to_string())),
        Err(_) => return Err(ProviderError::UnsupportedFormat("unrecognized".to_string())),
    };

    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        base64::engine::general_purpose::STANDARD.encode(image)
    ))
}

/// Extract, parse and validate the judgment from a completion body.
fn parse_completion(body: &str) -> Result<VisionJudgment, ProviderError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(ProviderError::EmptyResponse)?;

    if let Some(refusal) = message.refusal.filter(|r| !r.is_empty()) {
        return Err(ProviderError::Parse(format!("model refused: {}", refusal)));
    }

    let content = message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse)?;

    let mut judgment: VisionJudgment = serde_json::from_str(strip_code_fence(&content))
        .map_err(|e| ProviderError::Parse(e.to_string()))?;
    judgment.normalize();

    judgment
        .validate()
        .map_err(|e| ProviderError::Parse(format!("schema validation failed: {}", e)))?;

    Ok(judgment)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn string_list() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

/// Strict output schema; every property is required and nullable where optional.
fn judgment_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "confidence", "labels", "objects", "materials", "damage", "issues",
            "measurements", "needsMorePhotos", "scope"
        ],
        "properties": {
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "labels": string_list(),
            "objects": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["name", "notes"],
                    "properties": {
                        "name": { "type": "string" },
                        "notes": { "type": ["string", "null"] }
                    }
                }
            },
            "materials": string_list(),
            "damage": string_list(),
            "issues": string_list(),
            "measurements": string_list(),
            "needsMorePhotos": string_list(),
            "scope": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "needsClarification", "clarificationReasons", "suggestedTiers",
                    "tradeCategory", "severity"
                ],
                "properties": {
                    "needsClarification": { "type": "boolean" },
                    "clarificationReasons": string_list(),
                    "suggestedTiers": string_list(),
                    "tradeCategory": { "type": ["string", "null"] },
                    "severity": { "type": ["string", "null"], "enum": ["spot", "partial", "full", null] }
                }
            }
        }
    })
}
