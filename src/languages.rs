use serde::{Deserialize, Serialize};
use std::fmt;

/// A language the detector and both backends understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupportedLanguage {
    /// BCP-47 style code used everywhere outside the detector
    pub code: &'static str,
    /// English display name, also used in prompts
    pub name: &'static str,
}

pub const SUPPORTED_LANGUAGES: [SupportedLanguage; 14] = [
    SupportedLanguage { code: "en", name: "English" },
    SupportedLanguage { code: "zh-Hans", name: "Chinese (Simplified)" },
    SupportedLanguage { code: "zh-Hant", name: "Chinese (Traditional)" },
    SupportedLanguage { code: "ja", name: "Japanese" },
    SupportedLanguage { code: "ko", name: "Korean" },
    SupportedLanguage { code: "fr", name: "French" },
    SupportedLanguage { code: "de", name: "German" },
    SupportedLanguage { code: "es", name: "Spanish" },
    SupportedLanguage { code: "pt-BR", name: "Portuguese (Brazil)" },
    SupportedLanguage { code: "ru", name: "Russian" },
    SupportedLanguage { code: "ar", name: "Arabic" },
    SupportedLanguage { code: "it", name: "Italian" },
    SupportedLanguage { code: "th", name: "Thai" },
    SupportedLanguage { code: "vi", name: "Vietnamese" },
];

/// Code used in results when no language could be detected.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

pub fn find(code: &str) -> Option<&'static SupportedLanguage> {
    SUPPORTED_LANGUAGES.iter().find(|lang| lang.code == code)
}

pub fn is_supported(code: &str) -> bool {
    find(code).is_some()
}

/// Display name for a code, falling back to the code itself.
pub fn display_name(code: &str) -> &str {
    find(code).map(|lang| lang.name).unwrap_or(code)
}

/// Simplified and Traditional Chinese share a family.
pub fn is_chinese(code: &str) -> bool {
    code.starts_with("zh")
}

/// A (source, target) combination a local engine has installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.source, self.target)
    }
}
