// Remote backend for OpenAI-compatible chat completion APIs.
// Streams server-sent events and yields each `delta.content` as a chunk.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::stream::{LineEvent, decode_lines};
use super::{ChunkStream, TranslationBackend, TranslationRequest};
use crate::config::OpenAiConfig;
use crate::credentials::{CredentialStore, OPENAI_API_KEY};
use crate::error::{MoePeekError, Result, TranslationError};
use crate::languages;

pub const SERVICE_NAME: &str = "OpenAI";

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}

pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(MoePeekError::Http)?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    /// System prompt with the target language filled in.
    pub fn system_prompt(&self, target_lang: &str) -> String {
        self.config
            .system_prompt_template
            .replace("{target_lang}", languages::display_name(target_lang))
    }

    fn build_request<'a>(&'a self, request: &TranslationRequest) -> ChatRequest<'a> {
        let mut system = self.system_prompt(&request.target_lang);
        if let Some(source) = &request.source_lang {
            system.push_str(&format!(
                "\nThe source text is in {}.",
                languages::display_name(source)
            ));
        }

        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: request.text.clone(),
                },
            ],
            temperature: self.config.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl TranslationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn translate_stream(
        &self,
        request: &TranslationRequest,
    ) -> std::result::Result<ChunkStream, TranslationError> {
        let api_key = self
            .credentials
            .load(OPENAI_API_KEY)
            .ok_or(TranslationError::MissingCredential)?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.build_request(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::from_status(status, &extract_error_message(&body)));
        }

        Ok(decode_lines(response.bytes_stream(), parse_sse_line))
    }
}

/// Decode one server-sent event line.
pub fn parse_sse_line(line: &str) -> std::result::Result<LineEvent, TranslationError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        // blank separators, comments, `event:` and `id:` fields
        return Ok(LineEvent::skip());
    };

    let data = data.trim();
    if data == "[DONE]" {
        return Ok(LineEvent::done());
    }

    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| TranslationError::InvalidResponse(format!("Failed to parse stream event: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(TranslationError::InvalidResponse(error.message));
    }

    match chunk.choices.into_iter().next().and_then(|choice| choice.delta.content) {
        Some(content) => Ok(LineEvent::chunk(content)),
        None => Ok(LineEvent::skip()),
    }
}

/// Pull `error.message` out of an error body, or return the body as is.
fn extract_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ApiErrorBody,
    }

    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string())
}
