// Local backend: an Ollama server on this machine.
// No credential; only the language pairs listed in the configuration are accepted.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::stream::{LineEvent, decode_lines};
use super::{ChunkStream, TranslationBackend, TranslationRequest, is_local_available};
use crate::config::LocalConfig;
use crate::error::{MoePeekError, Result, TranslationError};
use crate::languages::{self, UNKNOWN_LANGUAGE};

pub const SERVICE_NAME: &str = "Ollama";

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: String,
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<String>,
}

pub struct LocalBackend {
    client: Client,
    config: LocalConfig,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(MoePeekError::Http)?;

        Ok(Self { client, config })
    }

    /// Build the prompt sent to the local model
    fn build_prompt(&self, request: &TranslationRequest) -> String {
        let target = languages::display_name(&request.target_lang);
        let source = request
            .source_lang
            .as_deref()
            .map(languages::display_name)
            .unwrap_or("the original language");

        format!(
            "You are a professional translator.\n\
             Translate the following text from {} to {}.\n\
             Output ONLY the translation. Do not add explanations, alternatives, or quotes.\n\
             \n\
             {}",
            source, target, request.text
        )
    }
}

#[async_trait]
impl TranslationBackend for LocalBackend {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn translate_stream(
        &self,
        request: &TranslationRequest,
    ) -> std::result::Result<ChunkStream, TranslationError> {
        let source = request.source_lang.as_deref();
        if !is_local_available(&self.config.supported_pairs, source, &request.target_lang) {
            return Err(TranslationError::UnsupportedLanguagePair {
                from: source.unwrap_or(UNKNOWN_LANGUAGE).to_string(),
                to: request.target_lang.clone(),
            });
        }

        let body = GenerateRequest {
            model: &self.config.model,
            prompt: self.build_prompt(request),
            stream: true,
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslationError::from_status(status, &error_text));
        }

        Ok(decode_lines(response.bytes_stream(), parse_ndjson_line))
    }
}

/// Decode one line of Ollama's newline-delimited JSON stream.
pub fn parse_ndjson_line(line: &str) -> std::result::Result<LineEvent, TranslationError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::skip());
    }

    let chunk: GenerateChunk = serde_json::from_str(line)
        .map_err(|e| TranslationError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(TranslationError::InvalidResponse(error));
    }

    Ok(LineEvent {
        chunk: (!chunk.response.is_empty()).then_some(chunk.response),
        done: chunk.done,
    })
}
