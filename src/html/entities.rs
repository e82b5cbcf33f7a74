//! Attribute value decoding with the character reference rules browsers apply.
//!
//! Values are decoded by html5ever (through `scraper`) rather than by pattern matching, so
//! padded numeric references, named references and missing semicolons all resolve exactly
//! as they would when the markup is rendered.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::html::token::Attr;

static HOLDER: Lazy<Selector> = Lazy::new(|| Selector::parse("span").expect("span selector"));

/// Decodes a single raw attribute value.
pub fn decode_attr_value(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    decode_attrs(&[("v".to_string(), Some(raw.to_string()))])
        .pop()
        .and_then(|(_, v)| v)
        .unwrap_or_default()
}

/// Decodes every attribute value in one parse. Names and order are kept.
pub fn decode_attrs(attrs: &[Attr]) -> Vec<Attr> {
    let needs_decoding = attrs
        .iter()
        .any(|(_, v)| v.as_deref().is_some_and(|v| v.contains('&')));
    if !needs_decoding {
        return attrs.to_vec();
    }

    let mut holder = String::from("<span");
    for (i, (_, v)) in attrs.iter().enumerate() {
        if let Some(v) = v {
            holder.push_str(&format!(" v{i}=\"{}\"", v.replace('"', "&quot;")));
        }
    }
    holder.push_str("></span>");

    let fragment = Html::parse_fragment(&holder);
    let Some(span) = fragment.select(&HOLDER).next() else {
        return attrs.to_vec();
    };
    attrs
        .iter()
        .enumerate()
        .map(|(i, (k, v))| {
            let decoded = v.as_ref().map(|raw| {
                span.value()
                    .attr(&format!("v{i}"))
                    .map_or_else(|| raw.clone(), str::to_string)
            });
            (k.clone(), decoded)
        })
        .collect()
}
