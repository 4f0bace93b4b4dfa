use crate::languages::is_chinese;

/// Target used when Chinese text would otherwise be translated into Chinese.
pub const CHINESE_ALTERNATE: &str = "en";

/// Target used when any other text would be translated into its own language.
pub const DEFAULT_ALTERNATE: &str = "zh-Hans";

/// Pick the language to translate into.
///
/// `source` is the detected language, or the configured source language when
/// detection is turned off. The preferred target is returned unless it would
/// translate the text into the language it is already in.
pub fn resolve_target_language(source: Option<&str>, preferred: &str) -> String {
    let Some(source) = source else {
        return preferred.to_string();
    };

    if is_chinese(source) && is_chinese(preferred) {
        return CHINESE_ALTERNATE.to_string();
    }

    if source == preferred {
        return if is_chinese(source) {
            CHINESE_ALTERNATE.to_string()
        } else {
            DEFAULT_ALTERNATE.to_string()
        };
    }

    preferred.to_string()
}
