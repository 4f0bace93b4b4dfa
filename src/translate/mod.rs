// Translation backends
//
// Every backend turns a request into a finite stream of translated chunks:
// - OpenAi: remote OpenAI-compatible chat API, needs an API key
// - Local: Ollama on this machine, limited to the configured language pairs
//
// The set of backends is closed (`Backend`); which one runs first is decided
// by `select_backend`, a pure function of preferences and pair availability.

pub mod local;
pub mod openai;
pub mod stream;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub use local::LocalBackend;
pub use openai::OpenAiBackend;

use crate::config::{Config, ServiceKind};
use crate::credentials::CredentialStore;
use crate::error::{Result, TranslationError};
use crate::languages::LanguagePair;

/// Backend every failed attempt falls back to.
pub const FALLBACK_SERVICE: ServiceKind = ServiceKind::OpenAi;

/// Translated text as it arrives. Consumed once; an error ends the stream.
pub type ChunkStream = BoxStream<'static, std::result::Result<String, TranslationError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    /// `None` when the source language is unknown
    pub source_lang: Option<String>,
    pub target_lang: String,
}

/// The streaming translation capability.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Name recorded in results
    fn name(&self) -> &str;

    /// Start a translation. Errors before the first chunk (connection, status,
    /// credentials) are returned here; later ones arrive through the stream.
    async fn translate_stream(
        &self,
        request: &TranslationRequest,
    ) -> std::result::Result<ChunkStream, TranslationError>;
}

pub enum Backend {
    OpenAi(OpenAiBackend),
    Local(LocalBackend),
}

#[async_trait]
impl TranslationBackend for Backend {
    fn name(&self) -> &str {
        match self {
            Self::OpenAi(backend) => backend.name(),
            Self::Local(backend) => backend.name(),
        }
    }

    async fn translate_stream(
        &self,
        request: &TranslationRequest,
    ) -> std::result::Result<ChunkStream, TranslationError> {
        match self {
            Self::OpenAi(backend) => backend.translate_stream(request).await,
            Self::Local(backend) => backend.translate_stream(request).await,
        }
    }
}

/// One backend per service kind.
pub struct Backends<B = Backend> {
    pub local: B,
    pub remote: B,
}

impl<B> Backends<B> {
    pub fn new(local: B, remote: B) -> Self {
        Self { local, remote }
    }

    pub fn get(&self, kind: ServiceKind) -> &B {
        match kind {
            ServiceKind::Local => &self.local,
            ServiceKind::OpenAi => &self.remote,
        }
    }
}

impl Backends<Backend> {
    pub fn from_config(config: &Config, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        Ok(Self {
            local: Backend::Local(LocalBackend::new(config.local.clone())?),
            remote: Backend::OpenAi(OpenAiBackend::new(config.openai.clone(), credentials)?),
        })
    }
}

/// Whether the local engine can handle this request without user action.
pub fn is_local_available(pairs: &[LanguagePair], source: Option<&str>, target: &str) -> bool {
    match source {
        Some(source) => pairs
            .iter()
            .any(|pair| pair.source == source && pair.target == target),
        None => false,
    }
}

/// Local when preferred and available, remote otherwise.
pub fn select_backend(preferred: ServiceKind, local_available: bool) -> ServiceKind {
    match preferred {
        ServiceKind::Local if local_available => ServiceKind::Local,
        _ => ServiceKind::OpenAi,
    }
}
