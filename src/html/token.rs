//! Byte-preserving HTML fragment tokenizer.
//!
//! Every event keeps the exact source slice it came from, so writing back an untouched event
//! list reproduces the input byte for byte. Malformed markup never fails: anything that does
//! not parse as a tag is emitted as text.

pub const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose content is consumed up to the matching close tag as a single text event.
///
/// `pre` and `code` are ordinary elements here: browsers parse markup inside them.
pub const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes", "noscript",
    "plaintext",
];

pub type Attr = (String, Option<String>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtmlEvent {
    Start {
        name: String,
        attrs: Vec<Attr>,
        self_closing: bool,
        raw: String,
    },
    End {
        name: String,
        raw: String,
    },
    Text {
        raw: String,
    },
    Comment {
        raw: String,
    },
    Doctype {
        raw: String,
    },
}

impl HtmlEvent {
    /// Builds a start tag with freshly rendered source text.
    pub fn start(name: &str, attrs: Vec<Attr>) -> Self {
        let raw = render_start(name, &attrs, false);
        HtmlEvent::Start {
            name: name.to_string(),
            attrs,
            self_closing: false,
            raw,
        }
    }

    pub fn end(name: &str) -> Self {
        HtmlEvent::End {
            name: name.to_string(),
            raw: format!("</{name}>"),
        }
    }

    pub fn text(raw: impl Into<String>) -> Self {
        HtmlEvent::Text { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        match self {
            HtmlEvent::Start { raw, .. }
            | HtmlEvent::End { raw, .. }
            | HtmlEvent::Text { raw }
            | HtmlEvent::Comment { raw }
            | HtmlEvent::Doctype { raw } => raw,
        }
    }
}

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&name)
}

pub fn attr_value<'a>(attrs: &'a [Attr], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_deref().unwrap_or(""))
}

pub fn render_start(name: &str, attrs: &[Attr], self_closing: bool) -> String {
    let mut out = String::with_capacity(name.len() + 2 + attrs.len() * 16);
    out.push('<');
    out.push_str(name);
    for (k, v) in attrs {
        out.push(' ');
        out.push_str(k);
        if let Some(v) = v {
            out.push_str("=\"");
            out.push_str(&escape_attr(v));
            out.push('"');
        }
    }
    if self_closing {
        out.push_str(" /");
    }
    out.push('>');
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn write_html(events: &[HtmlEvent]) -> String {
    let cap = events.iter().map(|e| e.raw().len()).sum();
    let mut out = String::with_capacity(cap);
    for ev in events {
        out.push_str(ev.raw());
    }
    out
}

pub fn parse_html(input: &str) -> Vec<HtmlEvent> {
    let bytes = input.as_bytes();
    let lower = input.to_ascii_lowercase();
    let len = bytes.len();

    let mut events: Vec<HtmlEvent> = Vec::new();
    let mut text_start = 0usize;
    let mut i = 0usize;

    let flush_text = |events: &mut Vec<HtmlEvent>, from: usize, to: usize| {
        if to > from {
            events.push(HtmlEvent::text(&input[from..to]));
        }
    };

    while i < len {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if lower[i..].starts_with("<!--") {
            let end = lower[i + 4..].find("-->").map(|p| i + 4 + p + 3).unwrap_or(len);
            flush_text(&mut events, text_start, i);
            events.push(HtmlEvent::Comment {
                raw: input[i..end].to_string(),
            });
            i = end;
            text_start = i;
            continue;
        }

        let next = bytes.get(i + 1).copied().unwrap_or(b' ');
        if next == b'!' || next == b'?' {
            let end = lower[i..].find('>').map(|p| i + p + 1).unwrap_or(len);
            flush_text(&mut events, text_start, i);
            events.push(HtmlEvent::Doctype {
                raw: input[i..end].to_string(),
            });
            i = end;
            text_start = i;
            continue;
        }

        if next == b'/' && bytes.get(i + 2).is_some_and(u8::is_ascii_alphabetic) {
            let Some(gt) = lower[i..].find('>').map(|p| i + p) else {
                break;
            };
            let name = read_name(&lower, i + 2);
            flush_text(&mut events, text_start, i);
            events.push(HtmlEvent::End {
                name,
                raw: input[i..=gt].to_string(),
            });
            i = gt + 1;
            text_start = i;
            continue;
        }

        if !next.is_ascii_alphabetic() {
            i += 1;
            continue;
        }

        let Some(tag) = parse_tag(input, &lower, i) else {
            i += 1;
            continue;
        };
        flush_text(&mut events, text_start, i);
        let raw_text = is_raw_text(&tag.name) && !tag.self_closing;
        let name = tag.name.clone();
        events.push(HtmlEvent::Start {
            name: tag.name,
            attrs: tag.attrs,
            self_closing: tag.self_closing,
            raw: input[i..tag.end].to_string(),
        });
        i = tag.end;
        text_start = i;

        if raw_text {
            match find_close_tag(&lower, i, &name) {
                Some((close_start, close_end)) => {
                    flush_text(&mut events, i, close_start);
                    events.push(HtmlEvent::End {
                        name,
                        raw: input[close_start..close_end].to_string(),
                    });
                    i = close_end;
                }
                None => {
                    flush_text(&mut events, i, len);
                    i = len;
                }
            }
            text_start = i;
        }
    }
    flush_text(&mut events, text_start, len);
    events
}

struct ParsedTag {
    name: String,
    attrs: Vec<Attr>,
    self_closing: bool,
    end: usize,
}

fn read_name(lower: &str, from: usize) -> String {
    lower[from..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
        .collect()
}

fn parse_tag(input: &str, lower: &str, start: usize) -> Option<ParsedTag> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let name = read_name(lower, start + 1);
    let mut pos = start + 1 + name.len();
    let mut attrs: Vec<Attr> = Vec::new();

    loop {
        while pos < len && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= len {
            return None;
        }
        match bytes[pos] {
            b'>' => {
                return Some(ParsedTag {
                    name,
                    attrs,
                    self_closing: false,
                    end: pos + 1,
                })
            }
            b'/' if bytes.get(pos + 1) == Some(&b'>') => {
                return Some(ParsedTag {
                    name,
                    attrs,
                    self_closing: true,
                    end: pos + 2,
                })
            }
            b'/' | b'"' | b'\'' | b'=' | b'<' => {
                pos += 1;
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while pos < len
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'=' | b'>' | b'/' | b'"' | b'\'' | b'<')
        {
            pos += 1;
        }
        let attr_name = lower[name_start..pos].to_string();

        let mut ws = pos;
        while ws < len && bytes[ws].is_ascii_whitespace() {
            ws += 1;
        }
        if ws < len && bytes[ws] == b'=' {
            pos = ws + 1;
            while pos < len && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= len {
                return None;
            }
            let value = match bytes[pos] {
                q @ (b'"' | b'\'') => {
                    let close = input[pos + 1..].find(q as char)? + pos + 1;
                    let v = input[pos + 1..close].to_string();
                    pos = close + 1;
                    v
                }
                _ => {
                    let v_start = pos;
                    while pos < len && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'>' {
                        pos += 1;
                    }
                    input[v_start..pos].to_string()
                }
            };
            attrs.push((attr_name, Some(value)));
        } else {
            attrs.push((attr_name, None));
        }
    }
}

fn find_close_tag(lower: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let needle = format!("</{name}");
    let mut search = from;
    while let Some(p) = lower[search..].find(&needle) {
        let start = search + p;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b'>') => return Some((start, after + 1)),
            Some(c) if c.is_ascii_whitespace() || *c == b'/' => {
                let gt = lower[after..].find('>')? + after;
                return Some((start, gt + 1));
            }
            None => return None,
            _ => search = after,
        }
    }
    None
}
