use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::attachment::ImageAttachment;
use crate::config::GeminiConfig;
use crate::error::{ProviderError, TransportError};

pub const TEXT_TEMPERATURE: f32 = 0.7;
pub const IMAGE_TEMPERATURE: f32 = 0.4;

pub const SYSTEM_INSTRUCTION: &str = "You are a professional, high-speed AI assistant. \
Provide extremely accurate and clear answers. For math, use step-by-step logic. \
For general questions, be concise but thorough. Use Markdown for formatting.";

pub const DEFAULT_IMAGE_PROMPT: &str = "Analyze this image. If it contains a question, \
a math problem, or a diagram, solve it step-by-step. If it's a general image, describe it in detail.";

/// A single question for the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Text { prompt: String },
    Image { prompt: String, image: ImageAttachment },
}

impl Query {
    pub fn new(prompt: &str, image: Option<ImageAttachment>) -> Self {
        let prompt = prompt.to_string();
        match image {
            Some(image) => Query::Image { prompt, image },
            None => Query::Text { prompt },
        }
    }
}

/// Normalized outcome of [`Gateway::ask`]. `error` being set means failure regardless of `text`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub text: String,
    pub error: Option<ProviderError>,
}

impl QueryResult {
    pub fn success(text: String) -> Self {
        QueryResult { text, error: None }
    }

    pub fn failure(error: ProviderError) -> Self {
        QueryResult {
            text: String::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentBody {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Part {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
}

/// Everything needed to issue one `generateContent` call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub body: GenerateContentBody,
}

/// Shapes a query into the request that will be sent. Image queries go to the vision model.
pub fn build_request(query: &Query, config: &GeminiConfig) -> GenerateRequest {
    match query {
        Query::Image { prompt, image } => {
            let prompt = prompt.trim();
            let prompt = if prompt.is_empty() { DEFAULT_IMAGE_PROMPT } else { prompt };
            let image_part = Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: image.mime_type().to_string(),
                    data: image.payload().to_string(),
                }),
            };

            GenerateRequest {
                model: config.vision_model.clone(),
                body: GenerateContentBody {
                    contents: vec![Content {
                        role: Some("user".to_string()),
                        parts: vec![image_part, Part::text(prompt)],
                    }],
                    system_instruction: None,
                    generation_config: GenerationConfig {
                        temperature: IMAGE_TEMPERATURE,
                    },
                },
            }
        }
        Query::Text { prompt } => GenerateRequest {
            model: config.text_model.clone(),
            body: GenerateContentBody {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::text(prompt.trim())],
                }],
                system_instruction: Some(Content {
                    role: None,
                    parts: vec![Part::text(SYSTEM_INSTRUCTION)],
                }),
                generation_config: GenerationConfig {
                    temperature: TEXT_TEMPERATURE,
                },
            },
        },
    }
}

/// Delivers a request to the provider and returns the raw answer text.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError>;
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

fn candidate_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn status_error(status: u16, body: &str) -> TransportError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => TransportError::Status {
            status,
            code: envelope.error.status,
            message: envelope.error.message,
        },
        Err(_) => {
            let body = body.trim();
            let message = if body.len() > 800 {
                let cut = (0..=800).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
                format!("{}...", &body[..cut])
            } else {
                body.to_string()
            };
            TransportError::Status {
                status,
                code: None,
                message,
            }
        }
    }
}

/// REST transport for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn with_config(config: &GeminiConfig) -> Self {
        GeminiClient {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.resolve_api_key(),
        }
    }
}

#[async_trait]
impl Transport for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, TransportError> {
        let api_key = self.api_key.as_deref().ok_or(TransportError::MissingCredential)?;
        let url = format!("{}/models/{}:generateContent", self.api_base, request.model);

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let body: GenerateContentResponse = response.json().await?;
        Ok(candidate_text(body))
    }
}

static CREDENTIAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api[ _-]?key").expect("credential pattern is a valid regex"));

/// Last-resort classification of free-text error messages.
pub fn classify_message(message: &str) -> ProviderError {
    if CREDENTIAL_PATTERN.is_match(message) {
        ProviderError::InvalidCredential
    } else if message.to_lowercase().contains("quota") {
        ProviderError::RateLimited
    } else {
        ProviderError::Connection
    }
}

pub fn classify(error: &TransportError) -> ProviderError {
    match error {
        TransportError::MissingCredential => ProviderError::InvalidCredential,
        TransportError::Status { status, code, message } => match (*status, code.as_deref()) {
            (401 | 403, _) | (_, Some("UNAUTHENTICATED" | "PERMISSION_DENIED")) => ProviderError::InvalidCredential,
            (429, _) | (_, Some("RESOURCE_EXHAUSTED")) => ProviderError::RateLimited,
            _ => classify_message(message),
        },
        TransportError::Network(message) | TransportError::Untyped(message) => classify_message(message),
    }
}

/// Front door to the provider: picks the model, sends one request, normalizes the outcome.
#[derive(Clone)]
pub struct Gateway {
    config: GeminiConfig,
    transport: Arc<dyn Transport>,
}

impl Gateway {
    pub fn new(config: GeminiConfig, transport: Arc<dyn Transport>) -> Self {
        Gateway { config, transport }
    }

    pub fn from_config(config: &GeminiConfig) -> Self {
        Self::new(config.clone(), Arc::new(GeminiClient::with_config(config)))
    }

    /// One attempt, no retries. Always returns a result; failures are carried in `error`.
    pub async fn ask(&self, query: Query) -> QueryResult {
        let request = build_request(&query, &self.config);
        tracing::debug!(
            "Sending query to {} (temperature {})",
            request.model,
            request.body.generation_config.temperature
        );

        match self.transport.generate(&request).await {
            Ok(text) if !text.trim().is_empty() => QueryResult::success(text),
            Ok(_) => {
                tracing::warn!("{} returned no usable text", request.model);
                QueryResult::failure(ProviderError::EmptyAnswer)
            }
            Err(e) => {
                tracing::error!("Gemini API error: {}", e);
                QueryResult::failure(classify(&e))
            }
        }
    }
}
