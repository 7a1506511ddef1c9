//! Remote image description.
//!
//! The intake pipeline only needs [`ImageDescriber`]. [`GeminiDescriber`] is
//! the production implementation: one `generateContent` call per image, no
//! retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeminiConfig;
use crate::encode::DataUri;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_MODEL_ALIAS: &str = "20";

pub const ANALYSIS_PROMPT: &str = "You are inspecting an image attachment that a user just \
    uploaded. Describe what the image shows, then list its notable characteristics \
    (subject, composition, colors, any visible text) and any potential issues such as \
    blur, poor exposure, compression artifacts, cropping problems or sensitive content. \
    Answer in plain text.";

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model refused the request: {0}")]
    Refused(String),

    #[error("model returned no text")]
    Empty,

    #[error("image is not a base64 data URI")]
    InvalidInput,

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Capability to turn an encoded image into a free-text description.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe the image. Success always carries non-empty text.
    async fn describe(&self, image: &DataUri) -> Result<String, AnalysisError>;

    fn model_name(&self) -> &str;
}

/// Map the short model aliases to full Gemini model ids. Anything else is
/// taken as a model id as-is.
pub fn resolve_model(alias: &str) -> &str {
    match alias {
        "25" => "gemini-2.5-flash-preview-05-20",
        "20" => "gemini-2.0-flash",
        other => other,
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_description(self) -> Result<String, AnalysisError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AnalysisError::Refused(reason));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(AnalysisError::Empty);
        };

        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        let text = text.trim();

        if !text.is_empty() {
            return Ok(text.to_string());
        }
        let reason = candidate.finish_reason.unwrap_or_default();
        if matches!(reason.as_str(), "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST") {
            Err(AnalysisError::Refused(reason))
        } else {
            Err(AnalysisError::Empty)
        }
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiDescriber {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    prompt: String,
}

impl GeminiDescriber {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: resolve_model(DEFAULT_MODEL_ALIAS).to_string(),
            prompt: ANALYSIS_PROMPT.to_string(),
        }
    }

    pub fn from_config(config: &GeminiConfig) -> Self {
        Self::new(config.api_key.clone())
            .with_base_url(config.base_url.clone())
            .with_model(&config.model)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Accepts an alias (`20`, `25`) or a full model id.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = resolve_model(model).to_string();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl ImageDescriber for GeminiDescriber {
    async fn describe(&self, image: &DataUri) -> Result<String, AnalysisError> {
        let (Some(mime_type), Some(data)) = (image.mime(), image.payload()) else {
            return Err(AnalysisError::InvalidInput);
        };

        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text { text: &self.prompt },
                    RequestPart::InlineData {
                        inline_data: InlineData { mime_type, data },
                    },
                ],
            }],
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        info!(model = %self.model, mime = mime_type, bytes = data.len(), "sending image to Gemini");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let snippet: String = body.chars().take(500).collect();
            warn!(status = status.as_u16(), body = %snippet, "Gemini request failed");
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            AnalysisError::Api {
                status: status.as_u16(),
                body: format!("unparsable response: {e}"),
            }
        })?;
        let description = parsed.into_description()?;
        debug!(chars = description.len(), "Gemini description received");

        Ok(description)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
