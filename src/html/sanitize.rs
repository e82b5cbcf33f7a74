//! HTML fragment sanitizer and structural normalizer.
//!
//! Produces a flat, ordered [`SanitizedNode`] list: unsafe links are neutralized, orphan list
//! items are wrapped, table cell and caption text is whitespace-collapsed, and `pre`/`code`
//! blocks are carried through byte for byte as long as they hold nothing a browser would
//! treat as active markup.

use tracing::debug;

use crate::html::entities::{decode_attr_value, decode_attrs};
use crate::html::links::{classify_href, LinkSafety};
use crate::html::token::{is_void, parse_html, render_start, Attr, HtmlEvent};
use crate::ir::{render_nodes, LinkNode, MarkupKind, SanitizedNode};
use crate::textutil::collapse_whitespace_runs;

const ALLOWED_ELEMENTS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "blockquote",
    "strong", "b", "em", "i", "u", "s", "sub", "sup", "small", "mark", "q", "cite", "abbr",
    "span", "div", "section", "article", "header", "footer", "aside", "figure", "img", "table",
    "thead", "tbody", "tfoot", "tr", "th", "td", "caption", "colgroup", "col", "dl", "dt", "dd",
    "time", "del", "ins", "a", "figcaption",
];

/// Dropped together with everything inside them.
const DROPPED_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "form", "textarea", "select", "button", "noscript",
    "head", "template", "svg", "math", "title", "canvas", "frameset", "applet", "audio", "xmp",
    "noembed", "noframes", "plaintext",
];

const VERBATIM_ELEMENTS: &[&str] = &["pre", "code"];
/// Tags written through unchanged inside a verbatim block.
const VERBATIM_INLINE: &[&str] = &[
    "pre", "code", "b", "i", "em", "strong", "span", "kbd", "samp", "var", "u", "s", "sub",
    "sup", "mark", "small", "br",
];
const VERBATIM_INLINE_ATTRS: &[&str] = &["class", "title", "lang", "dir"];
const COLLAPSE_ELEMENTS: &[&str] = &["th", "td", "caption"];
const GLOBAL_ATTRS: &[&str] = &["title", "lang", "dir"];

fn allowed_attr(element: &str, attr: &str) -> bool {
    if GLOBAL_ATTRS.contains(&attr) {
        return true;
    }
    match element {
        "img" => matches!(attr, "alt" | "width" | "height"),
        "th" | "td" => matches!(
            attr,
            "colspan" | "rowspan" | "headers" | "scope" | "align" | "abbr"
        ),
        "ol" => matches!(attr, "start" | "reversed" | "type"),
        "col" | "colgroup" => attr == "span",
        "time" => attr == "datetime",
        _ => false,
    }
}

/// Keeps the allowed attributes, with values decoded so they can be re-rendered.
fn filter_attrs(element: &str, attrs: &[Attr]) -> Vec<Attr> {
    let kept: Vec<Attr> = attrs
        .iter()
        .filter(|(k, _)| allowed_attr(element, k))
        .cloned()
        .collect();
    decode_attrs(&kept)
}

fn verbatim_inline_tag(name: &str, attrs: &[Attr], raw: &str) -> bool {
    VERBATIM_INLINE.contains(&name)
        && attrs
            .iter()
            .all(|(k, _)| VERBATIM_INLINE_ATTRS.contains(&k.as_str()))
        && !raw[1..].contains('<')
}

/// Escapes each `<` in verbatim text that a browser would read as the start of markup.
fn escape_tag_openers(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    for (i, ch) in text.char_indices() {
        let opens_markup = ch == '<'
            && bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'));
        if opens_markup {
            out.push_str("&lt;");
        } else {
            out.push(ch);
        }
    }
    out
}

fn close_inline(block: &mut String, open: &mut Vec<&str>) {
    while let Some(n) = open.pop() {
        block.push_str(&format!("</{n}>"));
    }
}

pub fn sanitize(raw_html: &str) -> Vec<SanitizedNode> {
    let mut s = Sanitizer::default();
    s.run(&parse_html(raw_html));
    let nodes = s.finish();
    if render_nodes(&nodes).trim().is_empty() {
        return Vec::new();
    }
    debug!(nodes = nodes.len(), "sanitized fragment");
    nodes
}

pub fn sanitize_to_string(raw_html: &str) -> String {
    render_nodes(&sanitize(raw_html))
}

struct Frame {
    /// Input element name whose end tag closes this frame.
    source: String,
    /// Element actually written out; `None` when the tag itself was demoted.
    output: Option<String>,
    collapse: bool,
    seen_text: bool,
    open_index: usize,
    link: bool,
    auto_list: bool,
}

#[derive(Default)]
struct Sanitizer {
    out: Vec<SanitizedNode>,
    stack: Vec<Frame>,
    skipping: Option<(String, usize)>,
}

impl Sanitizer {
    fn run(&mut self, events: &[HtmlEvent]) {
        let mut i = 0usize;
        while i < events.len() {
            match &events[i] {
                HtmlEvent::Start {
                    name,
                    attrs,
                    self_closing: false,
                    raw,
                } if self.skipping.is_none() && VERBATIM_ELEMENTS.contains(&name.as_str()) => {
                    let consumed = self.on_verbatim(name, attrs, raw, &events[i + 1..]);
                    i += 1 + consumed;
                    continue;
                }
                HtmlEvent::Start {
                    name,
                    attrs,
                    self_closing,
                    ..
                } => self.on_start(name, attrs, *self_closing),
                HtmlEvent::End { name, .. } => self.on_end(name),
                HtmlEvent::Text { raw } => {
                    if self.skipping.is_none() {
                        self.on_text(raw);
                    }
                }
                HtmlEvent::Comment { .. } | HtmlEvent::Doctype { .. } => {}
            }
            i += 1;
        }
    }

    fn finish(mut self) -> Vec<SanitizedNode> {
        while !self.stack.is_empty() {
            self.close_top();
        }
        self.out
    }

    fn top_is_auto_list(&self) -> bool {
        self.stack.last().is_some_and(|f| f.auto_list)
    }

    fn top_source_is(&self, names: &[&str]) -> bool {
        self.stack
            .last()
            .is_some_and(|f| !f.auto_list && names.contains(&f.source.as_str()))
    }

    fn in_list(&self) -> bool {
        self.stack
            .iter()
            .any(|f| matches!(f.output.as_deref(), Some("ul") | Some("ol")))
    }

    fn push_markup(&mut self, html: String, kind: MarkupKind) {
        self.out.push(SanitizedNode::StructuralMarkup { html, kind });
    }

    fn push_text(&mut self, text: String) {
        if let Some(SanitizedNode::TranslatableText(prev)) = self.out.last_mut() {
            prev.push_str(&text);
            return;
        }
        self.out.push(SanitizedNode::TranslatableText(text));
    }

    fn open_frame(&mut self, source: &str, output: Option<&str>, attrs: Vec<Attr>) {
        let open_index = self.out.len();
        if let Some(out_name) = output {
            self.push_markup(render_start(out_name, &attrs, false), MarkupKind::Open);
        }
        self.stack.push(Frame {
            source: source.to_string(),
            output: output.map(str::to_string),
            collapse: false,
            seen_text: false,
            open_index,
            link: false,
            auto_list: false,
        });
    }

    fn close_top(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let Some(out_name) = frame.output.as_deref() else {
            return;
        };
        if frame.collapse {
            self.trim_trailing_text(frame.open_index);
        }
        if frame.link {
            self.backfill_link_text(frame.open_index);
        }
        self.push_markup(format!("</{out_name}>"), MarkupKind::Close);
    }

    fn close_through(&mut self, pos: usize) {
        while self.stack.len() > pos {
            self.close_top();
        }
    }

    fn trim_trailing_text(&mut self, open_index: usize) {
        for idx in (open_index + 1..self.out.len()).rev() {
            match &mut self.out[idx] {
                SanitizedNode::TranslatableText(t) => {
                    let trimmed_len = t.trim_end().len();
                    t.truncate(trimmed_len);
                    if t.is_empty() {
                        self.out.remove(idx);
                        continue;
                    }
                    return;
                }
                SanitizedNode::StructuralMarkup {
                    kind: MarkupKind::Close,
                    ..
                } => continue,
                _ => return,
            }
        }
    }

    fn backfill_link_text(&mut self, open_index: usize) {
        let text: String = self.out[open_index + 1..]
            .iter()
            .filter_map(|n| match n {
                SanitizedNode::TranslatableText(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        if let Some(SanitizedNode::Link(link)) = self.out.get_mut(open_index) {
            link.text = text.trim().to_string();
        }
    }

    fn on_text(&mut self, raw: &str) {
        if self.top_is_auto_list() {
            if raw.trim().is_empty() {
                return;
            }
            self.close_top();
        }
        let escaped = raw.replace('<', "&lt;");
        match self.stack.iter().rposition(|f| f.collapse) {
            Some(pos) => {
                let mut text = collapse_whitespace_runs(&escaped);
                if !self.stack[pos].seen_text {
                    text = text.trim_start().to_string();
                }
                if text.is_empty() {
                    return;
                }
                self.stack[pos].seen_text = true;
                self.push_text(text);
            }
            None => self.push_text(escaped),
        }
    }

    /// Writes a `pre`/`code` block and returns how many of the following events it consumed.
    ///
    /// Text bytes are kept except for `<` that would open markup. Plain inline formatting
    /// tags pass through; every other tag, comment or declaration is escaped into text.
    fn on_verbatim(
        &mut self,
        name: &str,
        attrs: &[Attr],
        start_raw: &str,
        rest: &[HtmlEvent],
    ) -> usize {
        if self.top_is_auto_list() {
            self.close_top();
        }
        let kept = filter_attrs(name, attrs);
        let mut block = if kept.len() == attrs.len() && !start_raw[1..].contains('<') {
            start_raw.to_string()
        } else {
            render_start(name, &kept, false)
        };

        let mut open: Vec<&str> = Vec::new();
        let mut closed = false;
        let mut consumed = 0usize;
        for ev in rest {
            consumed += 1;
            match ev {
                HtmlEvent::End { name: n, raw } if n == name && !open.contains(&n.as_str()) => {
                    close_inline(&mut block, &mut open);
                    block.push_str(raw);
                    closed = true;
                    break;
                }
                HtmlEvent::End { name: n, raw } if open.last() == Some(&n.as_str()) => {
                    open.pop();
                    block.push_str(raw);
                }
                HtmlEvent::Start {
                    name: n,
                    attrs,
                    self_closing,
                    raw,
                } if verbatim_inline_tag(n, attrs, raw) => {
                    if !self_closing && !is_void(n) {
                        open.push(n);
                    }
                    block.push_str(raw);
                }
                HtmlEvent::Text { raw } => block.push_str(&escape_tag_openers(raw)),
                other => block.push_str(&other.raw().replace('<', "&lt;")),
            }
        }
        if !closed {
            close_inline(&mut block, &mut open);
        }

        self.out.push(SanitizedNode::VerbatimBlock(block));
        if !closed {
            self.push_markup(format!("</{name}>"), MarkupKind::Close);
        }
        if let Some(pos) = self.stack.iter().rposition(|f| f.collapse) {
            self.stack[pos].seen_text = true;
        }
        consumed
    }

    fn on_start(&mut self, name: &str, attrs: &[Attr], self_closing: bool) {
        if let Some((skip_name, depth)) = self.skipping.as_mut() {
            if *skip_name == name && !self_closing {
                *depth += 1;
            }
            return;
        }
        if DROPPED_WITH_CONTENT.contains(&name) {
            if !self_closing && !is_void(name) {
                self.skipping = Some((name.to_string(), 1));
            }
            return;
        }

        // Implied end tags.
        match name {
            "li" if self.top_source_is(&["li"]) => self.close_top(),
            "td" | "th" if self.top_source_is(&["td", "th"]) => self.close_top(),
            "tr" => {
                if self.top_source_is(&["td", "th"]) {
                    self.close_top();
                }
                if self.top_source_is(&["tr"]) {
                    self.close_top();
                }
            }
            "p" if self.top_source_is(&["p"]) => self.close_top(),
            _ => {}
        }

        if self.top_is_auto_list() && name != "li" {
            self.close_top();
        }
        if name == "li" && !self.in_list() {
            self.open_frame("ul", Some("ul"), Vec::new());
            if let Some(f) = self.stack.last_mut() {
                f.auto_list = true;
            }
        }

        match name {
            "a" => self.open_anchor(attrs, self_closing),
            "img" => self.emit_img(attrs),
            "figcaption" => {
                self.open_frame("figcaption", Some("p"), filter_attrs("p", attrs));
                if let Some(f) = self.stack.last_mut() {
                    f.collapse = true;
                }
                if self_closing {
                    self.close_top();
                }
            }
            _ if ALLOWED_ELEMENTS.contains(&name) => {
                let kept = filter_attrs(name, attrs);
                if is_void(name) {
                    self.push_markup(render_start(name, &kept, false), MarkupKind::Void);
                    return;
                }
                self.open_frame(name, Some(name), kept);
                if COLLAPSE_ELEMENTS.contains(&name) {
                    if let Some(f) = self.stack.last_mut() {
                        f.collapse = true;
                    }
                }
                if self_closing {
                    self.close_top();
                }
            }
            // Unknown elements are unwrapped: the tag goes, the content stays.
            _ => {}
        }
    }

    fn open_anchor(&mut self, attrs: &[Attr], self_closing: bool) {
        if let Some(pos) = self
            .stack
            .iter()
            .rposition(|f| !f.auto_list && f.source == "a")
        {
            self.close_through(pos);
        }

        let href = attrs
            .iter()
            .find(|(k, _)| k == "href")
            .map(|(_, v)| v.clone().unwrap_or_default())
            .unwrap_or_default();
        let title = attrs
            .iter()
            .find(|(k, _)| k == "title")
            .and_then(|(_, v)| v.as_deref())
            .map(decode_attr_value);

        let safety = classify_href(&href);
        match &safety {
            LinkSafety::Safe(h) | LinkSafety::Rewritten(h) | LinkSafety::Nofollow(h) => {
                let open_index = self.out.len();
                self.out.push(SanitizedNode::Link(LinkNode {
                    href: h.clone(),
                    title,
                    nofollow: matches!(safety, LinkSafety::Nofollow(_)),
                    safety: safety.clone(),
                    text: String::new(),
                }));
                self.stack.push(Frame {
                    source: "a".to_string(),
                    output: Some("a".to_string()),
                    collapse: false,
                    seen_text: false,
                    open_index,
                    link: true,
                    auto_list: false,
                });
            }
            LinkSafety::Unresolvable => {
                debug!(href = %href, "protocol-relative link without host, wrapping text");
                self.open_frame("a", Some("span"), Vec::new());
            }
            LinkSafety::Demote(reason) => {
                debug!(href = %href, ?reason, "demoting anchor to text");
                self.open_frame("a", None, Vec::new());
            }
        }
        if self_closing {
            self.close_top();
        }
    }

    fn emit_img(&mut self, attrs: &[Attr]) {
        let src = attrs
            .iter()
            .find(|(k, _)| k == "src")
            .and_then(|(_, v)| v.clone())
            .unwrap_or_default();
        let src = match classify_href(&src) {
            LinkSafety::Safe(s) | LinkSafety::Rewritten(s) | LinkSafety::Nofollow(s) => s,
            LinkSafety::Unresolvable | LinkSafety::Demote(_) => {
                debug!(src = %src, "dropping image with unusable src");
                return;
            }
        };
        let mut kept = vec![("src".to_string(), Some(src))];
        kept.extend(filter_attrs("img", attrs));
        self.push_markup(render_start("img", &kept, false), MarkupKind::Void);
    }

    fn on_end(&mut self, name: &str) {
        if let Some((skip_name, depth)) = self.skipping.as_mut() {
            if *skip_name == name {
                *depth -= 1;
                if *depth == 0 {
                    self.skipping = None;
                }
            }
            return;
        }
        if is_void(name) {
            return;
        }
        if let Some(pos) = self
            .stack
            .iter()
            .rposition(|f| !f.auto_list && f.source == name)
        {
            self.close_through(pos);
        }
    }
}
