use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::sentinels::{ANY_MT_TOKEN_RE, NT_RE};

static DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit regex"));

/// Hard checks on a frozen translation; any failure means the output cannot be unfrozen safely.
pub fn validate_translation(
    frozen_source: &str,
    nt_map: &HashMap<String, String>,
    translated: &str,
) -> anyhow::Result<()> {
    if translated.trim().is_empty() {
        return Err(anyhow!("empty_output"));
    }

    // Markers the source never had are hallucinations or prompt leakage.
    let src_mt: HashSet<&str> = ANY_MT_TOKEN_RE
        .find_iter(frozen_source)
        .map(|m| m.as_str())
        .collect();
    for m in ANY_MT_TOKEN_RE.find_iter(translated) {
        let tok = m.as_str();
        if !src_mt.contains(tok) {
            return Err(anyhow!("unexpected_mt_token:{tok}"));
        }
    }

    for tok in nt_map.keys() {
        let src_count = frozen_source.matches(tok.as_str()).count();
        let tgt_count = translated.matches(tok.as_str()).count();
        if src_count != tgt_count {
            return Err(anyhow!(
                "nt_token_count_mismatch:{tok} expected={src_count} got={tgt_count}"
            ));
        }
    }
    Ok(())
}

/// Advisory flags that are logged but never fail a translation.
#[must_use]
pub fn soft_flags(frozen_source: &str, translated: &str) -> Vec<String> {
    let mut flags = Vec::new();

    let src_plain = NT_RE.replace_all(frozen_source, " ");
    let tgt_plain = NT_RE.replace_all(translated, " ");
    if digit_counter(&src_plain) != digit_counter(&tgt_plain) {
        flags.push("digits_mismatch".to_string());
    }

    let src_chars = src_plain.chars().filter(|c| !c.is_whitespace()).count();
    let tgt_chars = tgt_plain.chars().filter(|c| !c.is_whitespace()).count();
    if src_chars >= 40 {
        let ratio = tgt_chars as f32 / src_chars as f32;
        if ratio < 0.35 {
            flags.push(format!("len_ratio_too_short:{ratio:.2}"));
        } else if ratio > 2.8 {
            flags.push(format!("len_ratio_too_long:{ratio:.2}"));
        }
    }
    flags
}

fn digit_counter(text: &str) -> BTreeMap<String, usize> {
    let mut map = BTreeMap::new();
    for m in DIGIT_RE.find_iter(text) {
        *map.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freezer::freeze_text;

    #[test]
    fn accepts_output_with_all_tokens() {
        let fr = freeze_text("<p>Hello <b>world</b></p>");
        let out = "<<MT_NT:0001>>Hallo <<MT_NT:0002>>Welt<<MT_NT:0003>><<MT_NT:0004>>";
        validate_translation(&fr.text, &fr.nt_map, out).expect("valid");
    }

    #[test]
    fn rejects_dropped_or_duplicated_tokens() {
        let fr = freeze_text("<p>Hello <b>world</b></p>");
        let dropped = "<<MT_NT:0001>>Hallo Welt<<MT_NT:0004>>";
        assert!(validate_translation(&fr.text, &fr.nt_map, dropped).is_err());
        let duplicated = "<<MT_NT:0001>><<MT_NT:0001>>Hallo <<MT_NT:0002>>Welt<<MT_NT:0003>><<MT_NT:0004>>";
        assert!(validate_translation(&fr.text, &fr.nt_map, duplicated).is_err());
    }

    #[test]
    fn rejects_invented_markers_and_empty_output() {
        let fr = freeze_text("plain words");
        assert!(validate_translation(&fr.text, &fr.nt_map, "  ").is_err());
        let err = validate_translation(&fr.text, &fr.nt_map, "mots <<MT_NT:0009>>")
            .expect_err("invented marker");
        assert!(err.to_string().starts_with("unexpected_mt_token"));
    }

    #[test]
    fn digit_drift_is_only_a_soft_flag() {
        let flags = soft_flags("Rates rose 5 points", "Les taux ont augmenté de 6 points");
        assert!(flags.iter().any(|f| f == "digits_mismatch"));
    }
}
