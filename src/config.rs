use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{MoePeekError, Result};
use crate::languages::{self, LanguagePair};

/// Source language value meaning "detect automatically".
pub const AUTO_SOURCE: &str = "auto";

fn default_hint_weight() -> f64 {
    1.0
}

fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    pub detection: DetectionConfig,
    pub openai: OpenAiConfig,
    pub local: LocalConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Language to translate into unless the text is already in it
    pub target_language: String,
    /// Backend to try first
    pub preferred_service: ServiceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detect the source language automatically
    pub enabled: bool,
    /// With detection on: a preferred source ("auto" for none).
    /// With detection off: the source language used for every request.
    pub source_language: String,
    /// Minimum confidence for a detection to be reported
    pub confidence_threshold: f64,
    /// Hint weight given to a preferred source language
    #[serde(default = "default_hint_weight")]
    pub preferred_hint_weight: f64,
    /// Extra per-language hint weights, added to the built-in priors
    #[serde(default)]
    pub hints: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,
    /// Chat model to use
    pub model: String,
    /// System prompt; `{target_lang}` is replaced with the target language name
    pub system_prompt_template: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// Model to use for translation
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Language pairs the local model is set up for
    pub supported_pairs: Vec<LanguagePair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Command that captures a screen region and prints the recognized text.
    /// Empty output means the user cancelled the capture.
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Remote OpenAI-compatible API
    OpenAi,
    /// Local Ollama server
    Local,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = MoePeekError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" | "ollama" => Ok(Self::Local),
            _ => Err(MoePeekError::Config(format!(
                "Invalid service '{}'. Valid services: openai, local",
                s
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                target_language: "zh-Hans".to_string(),
                preferred_service: ServiceKind::OpenAi,
            },
            detection: DetectionConfig {
                enabled: true,
                source_language: AUTO_SOURCE.to_string(),
                confidence_threshold: 0.3,
                preferred_hint_weight: default_hint_weight(),
                hints: HashMap::new(),
            },
            openai: OpenAiConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                system_prompt_template: "You are a professional translator. Translate the user's text into {target_lang}. \
                     Output only the translation, without explanations, notes, or quotes."
                    .to_string(),
                timeout_secs: 30,
                temperature: default_temperature(),
            },
            local: LocalConfig {
                endpoint: "http://localhost:11434".to_string(),
                model: "qwen2.5:3b".to_string(),
                timeout_secs: 60,
                supported_pairs: vec![
                    LanguagePair::new("en", "zh-Hans"),
                    LanguagePair::new("zh-Hans", "en"),
                ],
            },
            capture: CaptureConfig {
                command: String::new(),
                args: Vec::new(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MoePeekError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| MoePeekError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MoePeekError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| MoePeekError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_language("general.target_language", &self.general.target_language)?;

        if self.detection.source_language != AUTO_SOURCE {
            check_language("detection.source_language", &self.detection.source_language)?;
        } else if !self.detection.enabled {
            return Err(MoePeekError::Config(
                "detection.source_language must name a language when detection is disabled"
                    .to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(MoePeekError::Config(format!(
                "detection.confidence_threshold must be between 0.0 and 1.0, got {}",
                self.detection.confidence_threshold
            )));
        }

        for pair in &self.local.supported_pairs {
            check_language("local.supported_pairs", &pair.source)?;
            check_language("local.supported_pairs", &pair.target)?;
        }

        Ok(())
    }

    /// Configured source language, if one is set.
    pub fn fixed_source_language(&self) -> Option<&str> {
        let source = self.detection.source_language.as_str();
        (source != AUTO_SOURCE).then_some(source)
    }

    /// Hints passed to the detector: configured extras plus the preferred source.
    pub fn detection_hints(&self) -> HashMap<String, f64> {
        let mut hints = self.detection.hints.clone();
        if let Some(source) = self.fixed_source_language() {
            *hints.entry(source.to_string()).or_insert(0.0) += self.detection.preferred_hint_weight;
        }
        hints
    }
}

fn check_language(field: &str, code: &str) -> Result<()> {
    if languages::is_supported(code) {
        Ok(())
    } else {
        Err(MoePeekError::Config(format!(
            "{}: unsupported language code '{}'",
            field, code
        )))
    }
}
