//! Source language detection
//!
//! Detection is a pure function of the text and the caller's hints: the
//! `lingua` engine produces raw confidence values for the supported
//! languages, static priors and caller hints reweight them, and the best
//! hypothesis is only reported when it clears the reliability threshold.

use lingua::{Language, LanguageDetectorBuilder};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::languages;

/// Threshold used by the simple [`DetectLanguage::detect`] form.
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Texts of at most this many characters are held to a stricter threshold.
pub const SHORT_TEXT_MAX_CHARS: usize = 5;

/// Minimum effective threshold for short texts.
pub const SHORT_TEXT_THRESHOLD: f64 = 0.5;

/// Below this confidence a display layer marks the language as uncertain.
pub const UNCERTAIN_DISPLAY_THRESHOLD: f64 = 0.6;

/// Engine languages, one per supported code except Chinese, which is
/// split into simplified and traditional after detection.
const ENGINE_LANGUAGES: [Language; 13] = [
    Language::English,
    Language::Chinese,
    Language::Japanese,
    Language::Korean,
    Language::French,
    Language::German,
    Language::Spanish,
    Language::Portuguese,
    Language::Russian,
    Language::Arabic,
    Language::Italian,
    Language::Thai,
    Language::Vietnamese,
];

/// Prior weights reflecting how often each language shows up in practice.
const BASE_HINTS: [(&str, f64); 14] = [
    ("en", 1.5),
    ("zh-Hans", 1.2),
    ("zh-Hant", 0.8),
    ("ja", 0.6),
    ("ko", 0.5),
    ("fr", 0.4),
    ("es", 0.4),
    ("it", 0.4),
    ("pt-BR", 0.3),
    ("de", 0.3),
    ("ru", 0.3),
    ("ar", 0.2),
    ("th", 0.2),
    ("vi", 0.2),
];

// Characters that only occur in one of the two Chinese scripts, paired by position.
const SIMPLIFIED_ONLY: &str =
    "们这个来时说国会学对还点开体与为无后过头发见问题经长门车东书话认实现爱电听关种样边让给觉语译简汉钱买卖写读";
const TRADITIONAL_ONLY: &str =
    "們這個來時說國會學對還點開體與為無後過頭發見問題經長門車東書話認實現愛電聽關種樣邊讓給覺語譯簡漢錢買賣寫讀";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Present only when `is_reliable` is true
    pub language: Option<String>,
    pub confidence: f64,
    pub is_reliable: bool,
}

impl DetectionResult {
    pub fn unknown() -> Self {
        Self {
            language: None,
            confidence: 0.0,
            is_reliable: false,
        }
    }

    /// A reliable detection that is still worth flagging to the reader.
    pub fn is_uncertain(&self) -> bool {
        self.is_reliable && self.confidence < UNCERTAIN_DISPLAY_THRESHOLD
    }
}

/// One ranked guess.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub language: String,
    pub confidence: f64,
}

/// The detection capability the orchestrator depends on.
pub trait DetectLanguage: Send + Sync {
    fn detect_with_confidence(
        &self,
        text: &str,
        threshold: f64,
        preferred_hints: &HashMap<String, f64>,
    ) -> DetectionResult;

    fn detect(&self, text: &str) -> Option<String> {
        self.detect_with_confidence(text, DEFAULT_THRESHOLD, &HashMap::new())
            .language
    }
}

/// `lingua`-backed detector restricted to the supported languages.
pub struct LanguageDetector {
    detector: lingua::LanguageDetector,
}

impl LanguageDetector {
    pub fn new() -> Self {
        Self {
            detector: LanguageDetectorBuilder::from_languages(&ENGINE_LANGUAGES).build(),
        }
    }
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectLanguage for LanguageDetector {
    fn detect_with_confidence(
        &self,
        text: &str,
        threshold: f64,
        preferred_hints: &HashMap<String, f64>,
    ) -> DetectionResult {
        let hints = merge_hints(preferred_hints);

        let raw: Vec<(String, f64)> = self
            .detector
            .compute_language_confidence_values(text)
            .into_iter()
            .map(|(language, confidence)| (to_code(language, text, &hints), confidence))
            .collect();

        let ranked = rank(raw, &hints);
        let result = evaluate(&ranked, text, threshold);
        debug!(
            "Detected {:?} (confidence {:.2}, reliable: {})",
            result.language, result.confidence, result.is_reliable
        );
        result
    }
}

/// Base priors plus caller hints, summed per code. Unknown codes are ignored.
pub fn merge_hints(extra: &HashMap<String, f64>) -> HashMap<String, f64> {
    let mut hints: HashMap<String, f64> = BASE_HINTS
        .iter()
        .map(|(code, weight)| (code.to_string(), *weight))
        .collect();

    for (code, weight) in extra {
        if languages::is_supported(code) {
            *hints.entry(code.clone()).or_insert(0.0) += weight;
        }
    }

    hints
}

/// Reweight raw engine confidences by the hints and sort best first.
///
/// Each confidence is scaled by `1 + hint` and the set is renormalized,
/// so the result is still a distribution over the candidates.
pub fn rank(raw: Vec<(String, f64)>, hints: &HashMap<String, f64>) -> Vec<Hypothesis> {
    let weighted: Vec<Hypothesis> = raw
        .into_iter()
        .filter(|(code, _)| languages::is_supported(code))
        .map(|(language, confidence)| {
            let prior = 1.0 + hints.get(&language).copied().unwrap_or(0.0).max(0.0);
            Hypothesis {
                language,
                confidence: confidence * prior,
            }
        })
        .collect();

    let total: f64 = weighted.iter().map(|h| h.confidence).sum();
    if total <= 0.0 {
        return Vec::new();
    }

    let mut ranked: Vec<Hypothesis> = weighted
        .into_iter()
        .map(|h| Hypothesis {
            confidence: h.confidence / total,
            ..h
        })
        .collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}

/// Threshold actually applied to `text`.
pub fn effective_threshold(text: &str, threshold: f64) -> f64 {
    if text.chars().count() <= SHORT_TEXT_MAX_CHARS {
        threshold.max(SHORT_TEXT_THRESHOLD)
    } else {
        threshold
    }
}

/// Pick the best hypothesis and apply the reliability rule.
pub fn evaluate(ranked: &[Hypothesis], text: &str, threshold: f64) -> DetectionResult {
    let Some(best) = ranked
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    else {
        return DetectionResult::unknown();
    };

    let is_reliable = best.confidence >= effective_threshold(text, threshold);

    DetectionResult {
        language: is_reliable.then(|| best.language.clone()),
        confidence: best.confidence,
        is_reliable,
    }
}

fn to_code(language: Language, text: &str, hints: &HashMap<String, f64>) -> String {
    match language {
        Language::Chinese => classify_han(text, hints).to_string(),
        Language::Portuguese => "pt-BR".to_string(),
        other => other.iso_code_639_1().to_string(),
    }
}

/// Decide between the two Chinese scripts by counting script-specific
/// characters. Ties go to whichever script carries the larger hint.
fn classify_han(text: &str, hints: &HashMap<String, f64>) -> &'static str {
    let simplified = text.chars().filter(|c| SIMPLIFIED_ONLY.contains(*c)).count();
    let traditional = text.chars().filter(|c| TRADITIONAL_ONLY.contains(*c)).count();

    if traditional > simplified {
        "zh-Hant"
    } else if simplified > traditional {
        "zh-Hans"
    } else {
        let hans = hints.get("zh-Hans").copied().unwrap_or(0.0);
        let hant = hints.get("zh-Hant").copied().unwrap_or(0.0);
        if hant > hans { "zh-Hant" } else { "zh-Hans" }
    }
}
