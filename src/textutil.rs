use once_cell::sync::Lazy;
use regex::Regex;

use crate::sentinels::ANY_SENTINEL_RE;

static LETTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}").expect("letter"));
static WS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws run"));

const RTL_LANGS: [&str; 13] = [
    "ar", "arc", "ckb", "dv", "fa", "he", "iw", "ks", "ps", "sd", "ug", "ur", "yi",
];

pub fn strip_sentinels(text: &str) -> String {
    ANY_SENTINEL_RE.replace_all(text, " ").into_owned()
}

/// True when nothing translatable is left once sentinels are removed.
pub fn is_trivial_sentinel_text(text: &str) -> bool {
    let plain = strip_sentinels(text);
    let plain = plain.trim();
    if plain.is_empty() {
        return true;
    }
    !LETTER_RE.is_match(plain)
}

/// Runs of whitespace (tabs and newlines included) become one space; ends are trimmed.
pub fn collapse_whitespace(text: &str) -> String {
    WS_RUN_RE.replace_all(text, " ").trim().to_string()
}

/// Collapses internal whitespace runs without trimming the ends.
pub fn collapse_whitespace_runs(text: &str) -> String {
    WS_RUN_RE.replace_all(text, " ").into_owned()
}

/// Splits `text` into (leading whitespace, core, trailing whitespace).
pub fn split_outer_whitespace(text: &str) -> (&str, &str, &str) {
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len().max(start);
    (&text[..start], &text[start..end], &text[end..])
}

pub fn primary_subtag(lang: &str) -> String {
    lang.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn same_language(a: &str, b: &str) -> bool {
    let a = primary_subtag(a);
    !a.is_empty() && a == primary_subtag(b)
}

pub fn is_rtl_language(lang: &str) -> bool {
    let tag = lang.trim().to_ascii_lowercase().replace('_', "-");
    if tag.starts_with("ku-arab") {
        return true;
    }
    let primary = primary_subtag(&tag);
    RTL_LANGS.contains(&primary.as_str())
}

pub fn lang_label(lang: &str) -> String {
    let name = match primary_subtag(lang).as_str() {
        "ar" => "Arabic",
        "de" => "German",
        "en" => "English",
        "es" => "Spanish",
        "fa" => "Persian",
        "fr" => "French",
        "he" | "iw" => "Hebrew",
        "hi" => "Hindi",
        "it" => "Italian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "nl" => "Dutch",
        "pl" => "Polish",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "sv" => "Swedish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "ur" => "Urdu",
        "zh" => "Chinese",
        _ => return lang.trim().to_string(),
    };
    format!("{name} ({})", lang.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_handles_tabs_and_newlines() {
        assert_eq!(collapse_whitespace("  a\t\tb\n\n c  "), "a b c");
    }

    #[test]
    fn outer_whitespace_split_keeps_all_bytes() {
        let (lead, core, trail) = split_outer_whitespace("\n  hi there \t");
        assert_eq!((lead, core, trail), ("\n  ", "hi there", " \t"));
        let (lead, core, trail) = split_outer_whitespace("   ");
        assert_eq!(format!("{lead}{core}{trail}"), "   ");
        assert!(core.is_empty());
    }

    #[test]
    fn rtl_detection_uses_primary_subtag() {
        assert!(is_rtl_language("ar"));
        assert!(is_rtl_language("he-IL"));
        assert!(is_rtl_language("fa_IR"));
        assert!(is_rtl_language("ku-Arab"));
        assert!(!is_rtl_language("ku"));
        assert!(!is_rtl_language("en"));
        assert!(!is_rtl_language(""));
    }

    #[test]
    fn same_language_ignores_region_and_case() {
        assert!(same_language("en-US", "EN"));
        assert!(!same_language("", ""));
        assert!(!same_language("pt", "es"));
    }

    #[test]
    fn markup_only_text_is_trivial() {
        assert!(is_trivial_sentinel_text("<<MT_NT:0001>> 42 <<MT_NT:0002>>"));
        assert!(!is_trivial_sentinel_text("<<MT_NT:0001>>Hello"));
    }
}
