use thiserror::Error;

#[derive(Error, Debug)]
pub enum MoePeekError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Credential(String),

    #[error(transparent)]
    Translation(#[from] TranslationError),
}

pub type Result<T> = std::result::Result<T, MoePeekError>;

/// Everything that can end a translation operation.
///
/// The `Display` text of each variant is what the orchestrator publishes in
/// `TranslationState::Error`, so it is written for the person reading the popup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Accessibility permission not granted. Open Settings to enable it.")]
    PermissionDenied,

    #[error("No text selected. Select some text and try again.")]
    NoInputAvailable,

    #[error("Empty text")]
    EmptyInput,

    #[error("OCR failed: {0}")]
    CaptureFailed(String),

    #[error("API key not configured. Add one with `moepeek key set`.")]
    MissingCredential,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response from translation service: {0}")]
    InvalidResponse(String),

    #[error("Language pair {from} → {to} is not available for this service")]
    UnsupportedLanguagePair { from: String, to: String },

    #[error("Translation service returned an empty result")]
    EmptyResult,
}

impl TranslationError {
    /// Whether a second backend could plausibly succeed where this attempt failed.
    ///
    /// Input and capture problems are the user's to fix; anything a backend
    /// produced (including a stream that finished without text) is eligible.
    pub fn should_fallback(&self) -> bool {
        match self {
            Self::PermissionDenied
            | Self::NoInputAvailable
            | Self::EmptyInput
            | Self::CaptureFailed(_) => false,
            Self::MissingCredential
            | Self::Network(_)
            | Self::Timeout
            | Self::Unauthorized(_)
            | Self::RateLimited(_)
            | Self::Api { .. }
            | Self::InvalidResponse(_)
            | Self::UnsupportedLanguagePair { .. }
            | Self::EmptyResult => true,
        }
    }

    /// Map a transport error from reqwest onto the backend taxonomy.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status and its body onto the backend taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            body.trim().to_string()
        };

        match status.as_u16() {
            401 | 403 => Self::Unauthorized(message),
            429 => Self::RateLimited(message),
            code => Self::Api {
                status: code,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_transport(err)
    }
}
