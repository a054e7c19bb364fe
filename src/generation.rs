//! Text generation provider abstraction.
//!
//! The pipeline talks to a language model through the [`Generator`] trait:
//! one prompt in, one completion out. When the caller supplies a JSON
//! schema, providers that support constrained output are asked to honor it
//! (OpenAI `json_schema` response format, Gemini `responseMimeType`).
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"disabled"` | [`DisabledGenerator`] |
//! | `"openai"` | [`OpenAIGenerator`] (`OPENAI_API_KEY`) |
//! | `"gemini"` | [`GeminiGenerator`] (`GEMINI_API_KEY`) |

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{from_http_failure, ServiceError};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_TOP_P: f32 = 0.95;

/// One completion request.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    /// JSON schema the completion must satisfy, if any.
    pub schema: Option<&'a Value>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// The external generation function: prompt → completion text.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ServiceError>;
}

/// Always fails with [`ServiceError::Disabled`].
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, ServiceError> {
        Err(ServiceError::Disabled("generation"))
    }
}

// ============ OpenAI ============

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Chat completions against OpenAI or a compatible gateway.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &GenerationConfig,
        api_key: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.schema.map(|schema| ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "structured_response",
                    strict: true,
                    schema,
                },
            }),
        };

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::transport("openai", e))?;

        if !response.status().is_success() {
            return Err(from_http_failure("openai", response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::invalid("openai", e.to_string()))?;
        openai_completion_text(parsed)
    }
}

/// Blocked output is a provider error; empty output is returned as-is so
/// the caller's parser reports it as unusable.
fn openai_completion_text(response: ChatResponse) -> Result<String, ServiceError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::invalid("openai", "no choices in response"))?;

    if let Some(refusal) = choice.message.refusal {
        return Err(ServiceError::Blocked {
            provider: "openai".to_string(),
            reason: refusal,
        });
    }
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(ServiceError::Blocked {
            provider: "openai".to_string(),
            reason: "content_filter".to_string(),
        });
    }

    Ok(choice
        .message
        .content
        .map(|text| text.trim().to_string())
        .unwrap_or_default())
}

// ============ Gemini ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Google Gemini `generateContent`.
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &GenerationConfig,
        api_key: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let api_key = api_key.into();
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Gemini provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }
}

fn gemini_request_body(request: &GenerationRequest<'_>) -> Value {
    let mut generation_config = serde_json::json!({
        "maxOutputTokens": request.max_tokens,
        "temperature": request.temperature,
        "topP": GEMINI_TOP_P,
    });
    if request.schema.is_some() {
        generation_config["responseMimeType"] = Value::from("application/json");
    }

    let safety: Vec<Value> = [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .iter()
    .map(|category| serde_json::json!({ "category": category, "threshold": "BLOCK_NONE" }))
    .collect();

    serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": generation_config,
        "safetySettings": safety,
    })
}

fn gemini_completion_text(response: GeminiResponse) -> Result<String, ServiceError> {
    let blocked = |reason: String| ServiceError::Blocked {
        provider: "gemini".to_string(),
        reason,
    };

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(blocked(reason));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::invalid("gemini", "no candidates in response"))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if matches!(
            reason,
            "SAFETY" | "RECITATION" | "OTHER" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        ) {
            return Err(blocked(reason.to_string()));
        }
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    Ok(text.trim().to_string())
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ServiceError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&gemini_request_body(request))
            .send()
            .await
            .map_err(|e| ServiceError::transport("gemini", e))?;

        if !response.status().is_success() {
            return Err(from_http_failure("gemini", response).await);
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::invalid("gemini", e.to_string()))?;
        gemini_completion_text(parsed)
    }
}

/// Create the configured [`Generator`].
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
