use crate::html::token::{is_void, parse_html, write_html, HtmlEvent};
use crate::textutil::is_rtl_language;

const UNTOUCHED_ROOTS: [&str; 2] = ["pre", "code"];

/// Marks translated HTML as right-to-left when `lang` is an RTL language.
///
/// Root elements get `dir="rtl"` unless they already carry a `dir`. When text sits at the
/// root the whole fragment is wrapped in `<div dir="rtl">` instead. `pre`/`code` roots are
/// never modified.
pub fn apply_direction(html: &str, lang: &str) -> String {
    if !is_rtl_language(lang) || html.trim().is_empty() {
        return html.to_string();
    }

    let mut events = parse_html(html);
    let mut depth = 0usize;
    let mut text_at_root = false;
    let mut roots: Vec<usize> = Vec::new();

    for (i, ev) in events.iter().enumerate() {
        match ev {
            HtmlEvent::Start {
                name, self_closing, ..
            } => {
                let opens = !self_closing && !is_void(name);
                if depth == 0 && opens {
                    roots.push(i);
                }
                if opens {
                    depth += 1;
                }
            }
            HtmlEvent::End { .. } => depth = depth.saturating_sub(1),
            HtmlEvent::Text { raw } if depth == 0 && !raw.trim().is_empty() => {
                text_at_root = true;
            }
            _ => {}
        }
    }

    if text_at_root {
        return format!("<div dir=\"rtl\">{html}</div>");
    }

    for i in roots {
        if let HtmlEvent::Start {
            name, attrs, raw, ..
        } = &mut events[i]
        {
            if UNTOUCHED_ROOTS.contains(&name.as_str()) || attrs.iter().any(|(k, _)| k == "dir") {
                continue;
            }
            *raw = with_dir_attr(raw);
            attrs.push(("dir".to_string(), Some("rtl".to_string())));
        }
    }
    write_html(&events)
}

/// Inserts ` dir="rtl"` before the closing `>` of a start tag, leaving the rest of its bytes alone.
fn with_dir_attr(start_tag: &str) -> String {
    let body = start_tag.strip_suffix('>').unwrap_or(start_tag);
    format!("{body} dir=\"rtl\">")
}
