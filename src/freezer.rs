use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::sentinels::{nt_token, ANY_SENTINEL_RE, NT_RE};

#[derive(Debug, Clone)]
pub struct FreezeResult {
    pub text: String,
    pub nt_map: HashMap<String, String>,
}

impl FreezeResult {
    /// Tokens in the order they were issued.
    pub fn tokens(&self) -> Vec<String> {
        let mut toks: Vec<String> = self.nt_map.keys().cloned().collect();
        toks.sort();
        toks
    }
}

static FREEZE_RE: Lazy<Regex> = Lazy::new(|| {
    let tag = r"</?[A-Za-z][^<>]*>";
    let entity = r"&(?:#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});";
    let url = r"https?://[^\s<>()]+";
    let email = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";
    let placeholder = r"(?:\{\{[^{}\r\n]{1,100}\}\}|\$\{[^{}\r\n]{1,100}\})";
    let pat = format!("({tag}|{entity}|{url}|{email}|{placeholder})");
    Regex::new(&pat).expect("freeze regex")
});

/// Replaces markup, entities, URLs and similar non-translatable runs with `<<MT_NT:nnnn>>`.
///
/// Sentinels already present in `text` are left in place and never re-frozen.
pub fn freeze_text(text: &str) -> FreezeResult {
    let mut nt_map: HashMap<String, String> = HashMap::new();
    let mut next_id: usize = 1;

    let mut freeze_plain = |plain: &str| -> String {
        if plain.is_empty() {
            return String::new();
        }
        let mut out = String::with_capacity(plain.len());
        let mut pos = 0usize;
        for m in FREEZE_RE.find_iter(plain) {
            out.push_str(&plain[pos..m.start()]);
            let token = nt_token(next_id);
            next_id += 1;
            nt_map.insert(token.clone(), m.as_str().to_string());
            out.push_str(&token);
            pos = m.end();
        }
        out.push_str(&plain[pos..]);
        out
    };

    let mut pieces: Vec<String> = Vec::new();
    let mut pos = 0usize;
    for m in ANY_SENTINEL_RE.find_iter(text) {
        pieces.push(freeze_plain(&text[pos..m.start()]));
        pieces.push(m.as_str().to_string());
        pos = m.end();
    }
    pieces.push(freeze_plain(&text[pos..]));

    FreezeResult {
        text: pieces.concat(),
        nt_map,
    }
}

pub fn unfreeze_text(text: &str, nt_map: &HashMap<String, String>) -> String {
    if nt_map.is_empty() || text.is_empty() {
        return text.to_string();
    }
    NT_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let tok = &caps[0];
            nt_map.get(tok).cloned().unwrap_or_else(|| tok.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freezes_tags_and_entities() {
        let fr = freeze_text(r#"<p>Fish &amp; chips at <a href="https://x.io/a">the pier</a></p>"#);
        assert_eq!(
            fr.text,
            "<<MT_NT:0001>>Fish <<MT_NT:0002>> chips at <<MT_NT:0003>>the pier<<MT_NT:0004>><<MT_NT:0005>>"
        );
        assert_eq!(fr.nt_map["<<MT_NT:0002>>"], "&amp;");
        assert_eq!(fr.tokens().len(), 5);
    }

    #[test]
    fn unfreeze_restores_original() {
        let src = "<td colspan=\"2\">Mail ops@example.com &mdash; now</td>";
        let fr = freeze_text(src);
        assert!(fr.nt_map.values().any(|v| v == "ops@example.com"));
        assert!(fr.text.starts_with("<<MT_NT:0001>>Mail "));
        assert_eq!(unfreeze_text(&fr.text, &fr.nt_map), src);
    }

    #[test]
    fn plain_comparison_operators_are_not_markup() {
        let fr = freeze_text("a < b and c > d");
        assert!(fr.nt_map.is_empty());
        assert_eq!(fr.text, "a < b and c > d");
    }
}
