//! Post-render check that a fragment carries no active content once a browser parses it.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static ANY_ELEMENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("*").expect("universal selector"));

const ACTIVE_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "applet", "form", "input", "button",
    "select", "textarea", "svg", "math", "template", "noscript", "link", "meta", "base",
    "frame", "frameset",
];
const URL_ATTRS: &[&str] = &["href", "src", "action", "formaction", "xlink:href", "poster"];
const BLOCKED_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:"];

/// Lists every active element or attribute found in `html`, parsed the way a browser would.
///
/// An empty result means the fragment is inert.
pub fn active_content(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let mut found = Vec::new();
    for el in fragment.select(&ANY_ELEMENT) {
        let el = el.value();
        let name = el.name();
        if ACTIVE_ELEMENTS.contains(&name) {
            found.push(format!("<{name}>"));
        }
        for (attr, value) in el.attrs() {
            let attr = attr.to_ascii_lowercase();
            if attr.starts_with("on") || matches!(attr.as_str(), "style" | "srcdoc") {
                found.push(format!("<{name} {attr}>"));
                continue;
            }
            if URL_ATTRS.contains(&attr.as_str()) && has_blocked_scheme(value) {
                found.push(format!("<{name} {attr}={value}>"));
            }
        }
    }
    found
}

fn has_blocked_scheme(url: &str) -> bool {
    let squeezed: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    BLOCKED_SCHEMES.iter().any(|s| squeezed.starts_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inert_markup_passes() {
        let html = "<p>a &lt;script>x&lt;/script> <a href=\"https://x.example/\">l</a></p><pre>&lt;img src=x onerror=y></pre>";
        assert!(active_content(html).is_empty());
    }

    #[test]
    fn handlers_scripts_and_scheme_urls_are_reported() {
        let found = active_content(
            "<pre><img src=x onerror=\"alert(1)\"></pre><a href=\"&#0000000106;avascript:go()\">x</a><script>y</script>",
        );
        assert_eq!(found.len(), 3, "{found:?}");
        assert!(found.iter().any(|f| f.contains("onerror")));
        assert!(found.iter().any(|f| f.contains("href=javascript:")));
        assert!(found.contains(&"<script>".to_string()));
    }
}
