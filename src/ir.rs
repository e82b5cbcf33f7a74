use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::html::links::LinkSafety;
use crate::html::token::render_start;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkupKind {
    Open,
    Close,
    Void,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkNode {
    pub href: String,
    pub title: Option<String>,
    pub nofollow: bool,
    pub safety: LinkSafety,
    /// Plain anchor text, filled in when the anchor closes.
    pub text: String,
}

impl LinkNode {
    pub fn start_tag(&self) -> String {
        let mut attrs = vec![("href".to_string(), Some(self.href.clone()))];
        if let Some(t) = &self.title {
            attrs.push(("title".to_string(), Some(t.clone())));
        }
        if self.nofollow {
            attrs.push(("rel".to_string(), Some("nofollow".to_string())));
        }
        render_start("a", &attrs, false)
    }
}

/// One segment of a sanitized fragment. Rendering all nodes in order yields the sanitized HTML.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SanitizedNode {
    TranslatableText(String),
    /// Source bytes of a `pre`/`code` element; never translated or reflowed.
    VerbatimBlock(String),
    StructuralMarkup {
        html: String,
        kind: MarkupKind,
    },
    /// Opening `<a>` of a safe link; the anchor text follows as ordinary nodes.
    Link(LinkNode),
}

impl SanitizedNode {
    pub fn html(&self) -> Cow<'_, str> {
        match self {
            SanitizedNode::TranslatableText(t) | SanitizedNode::VerbatimBlock(t) => {
                Cow::Borrowed(t)
            }
            SanitizedNode::StructuralMarkup { html, .. } => Cow::Borrowed(html),
            SanitizedNode::Link(link) => Cow::Owned(link.start_tag()),
        }
    }

    pub fn depth_delta(&self) -> i32 {
        match self {
            SanitizedNode::StructuralMarkup {
                kind: MarkupKind::Open,
                ..
            }
            | SanitizedNode::Link(_) => 1,
            SanitizedNode::StructuralMarkup {
                kind: MarkupKind::Close,
                ..
            } => -1,
            _ => 0,
        }
    }
}

pub fn render_nodes(nodes: &[SanitizedNode]) -> String {
    let mut out = String::new();
    for n in nodes {
        out.push_str(&n.html());
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum Payload {
    Verbatim(String),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub payload: Payload,
}

impl Chunk {
    pub fn is_translatable(&self) -> bool {
        matches!(self.payload, Payload::Text(_))
    }

    pub fn source(&self) -> &str {
        match &self.payload {
            Payload::Verbatim(s) | Payload::Text(s) => s,
        }
    }
}
