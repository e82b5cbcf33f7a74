//! Splits a sanitized node list into translator-sized chunks and splices translations back.

use std::collections::BTreeMap;

use anyhow::anyhow;

use crate::ir::{Chunk, MarkupKind, Payload, SanitizedNode};

pub const DEFAULT_SOFT_CHARS: usize = 3000;
pub const DEFAULT_HARD_CHARS: usize = 12000;
const MIN_SOFT_CHARS: usize = 200;

const BLOCK_ELEMENTS: [&str; 22] = [
    "p", "li", "ul", "ol", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
    "div", "section", "article", "figure", "table", "tr", "caption", "aside",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub soft_chars: usize,
    pub hard_chars: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            soft_chars: DEFAULT_SOFT_CHARS,
            hard_chars: DEFAULT_HARD_CHARS,
        }
    }
}

impl ChunkPolicy {
    /// Clamps to a usable policy: `soft >= MIN_SOFT_CHARS` and `hard >= soft`.
    pub fn new(soft_chars: usize, hard_chars: usize) -> Self {
        let soft_chars = soft_chars.max(MIN_SOFT_CHARS);
        Self {
            soft_chars,
            hard_chars: hard_chars.max(soft_chars),
        }
    }
}

struct Builder {
    policy: ChunkPolicy,
    chunks: Vec<Chunk>,
    buf: String,
    buf_chars: usize,
}

impl Builder {
    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let index = self.chunks.len();
        self.chunks.push(Chunk {
            index,
            payload: Payload::Text(std::mem::take(&mut self.buf)),
        });
        self.buf_chars = 0;
    }

    fn push_verbatim(&mut self, block: &str) {
        self.flush();
        let index = self.chunks.len();
        self.chunks.push(Chunk {
            index,
            payload: Payload::Verbatim(block.to_string()),
        });
    }

    fn append(&mut self, text: &str, chars: usize) {
        self.buf.push_str(text);
        self.buf_chars += chars;
    }

    fn push_atomic(&mut self, html: &str) {
        let n = html.chars().count();
        if self.buf_chars > 0 && self.buf_chars + n > self.policy.hard_chars {
            self.flush();
        }
        self.append(html, n);
    }

    fn push_text(&mut self, text: &str) {
        let mut rest = text;
        while !rest.is_empty() {
            let rest_chars = rest.chars().count();
            if self.buf_chars + rest_chars <= self.policy.hard_chars {
                self.append(rest, rest_chars);
                return;
            }
            let hard_room = self.policy.hard_chars.saturating_sub(self.buf_chars);
            if hard_room == 0 {
                self.flush();
                continue;
            }
            let soft_room = self.policy.soft_chars.saturating_sub(self.buf_chars);
            let cut = find_cut(rest, soft_room, hard_room);
            let head = &rest[..cut];
            self.append(head, head.chars().count());
            self.flush();
            rest = &rest[cut..];
        }
    }
}

/// Splits `nodes` into ordered chunks. Verbatim blocks become their own pass-through chunks;
/// translatable runs are cut at node boundaries, and only oversized text is cut internally.
pub fn chunk(nodes: &[SanitizedNode], policy: ChunkPolicy) -> Vec<Chunk> {
    let mut b = Builder {
        policy,
        chunks: Vec::new(),
        buf: String::new(),
        buf_chars: 0,
    };
    let mut depth: i32 = 0;

    for node in nodes {
        match node {
            SanitizedNode::VerbatimBlock(block) => {
                b.push_verbatim(block);
                continue;
            }
            SanitizedNode::TranslatableText(text) => b.push_text(text),
            other => {
                b.push_atomic(&other.html());
                depth = (depth + other.depth_delta()).max(0);
            }
        }
        if b.buf_chars >= policy.soft_chars && (depth == 0 || closes_block(node)) {
            b.flush();
        }
    }
    b.flush();
    b.chunks
}

fn closes_block(node: &SanitizedNode) -> bool {
    match node {
        SanitizedNode::StructuralMarkup {
            html,
            kind: MarkupKind::Close,
        } => {
            let name = html.trim_start_matches("</").trim_end_matches('>');
            BLOCK_ELEMENTS.contains(&name)
        }
        _ => false,
    }
}

fn byte_at_char(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n')
}

/// Byte offset to cut `text` at: a sentence end near the soft budget, else whitespace, else
/// the hard budget. Always > 0 and on a char boundary.
fn find_cut(text: &str, soft_room: usize, hard_room: usize) -> usize {
    let soft_b = byte_at_char(text, soft_room);
    let hard_b = byte_at_char(text, hard_room.max(1));

    let sentence_cuts = || {
        text[..hard_b]
            .char_indices()
            .zip(text[..hard_b].chars().skip(1).chain(std::iter::once(' ')))
            .filter(|((_, c), next)| is_sentence_end(*c) && next.is_whitespace())
            .map(|((i, c), _)| i + c.len_utf8())
    };
    let space_cuts = || {
        text[..hard_b]
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
    };

    let pick = |cuts: Vec<usize>| -> Option<usize> {
        cuts.iter()
            .copied()
            .filter(|&i| i > 0 && i <= soft_b)
            .last()
            .or_else(|| cuts.iter().copied().find(|&i| i > soft_b && i < hard_b))
    };

    let cut = pick(sentence_cuts().collect())
        .or_else(|| pick(space_cuts().collect()))
        .unwrap_or(hard_b);
    avoid_entity_split(text, cut.max(byte_at_char(text, 1)))
}

// Pull a hard cut back to before an unterminated `&entity`.
fn avoid_entity_split(text: &str, cut: usize) -> usize {
    let window_start = cut.saturating_sub(12);
    let window_start = (window_start..=cut)
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(cut);
    if let Some(amp) = text[window_start..cut].rfind('&') {
        let amp = window_start + amp;
        if !text[amp..cut].contains(';') && amp > 0 {
            return amp;
        }
    }
    cut
}

/// Splices translated text chunks back in chunk order; verbatim chunks are copied unchanged.
pub fn reassemble(chunks: &[Chunk], translated: &BTreeMap<usize, String>) -> anyhow::Result<String> {
    let mut out = String::new();
    for c in chunks {
        match &c.payload {
            Payload::Verbatim(v) => out.push_str(v),
            Payload::Text(_) => {
                let t = translated
                    .get(&c.index)
                    .ok_or_else(|| anyhow!("missing translation for chunk {}", c.index))?;
                out.push_str(t);
            }
        }
    }
    Ok(out)
}
