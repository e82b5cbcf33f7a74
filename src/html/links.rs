use once_cell::sync::Lazy;
use regex::Regex;

use crate::html::entities::decode_attr_value;

pub const SECURE_SCHEME: &str = "https:";

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z][a-z0-9+.\-]*):").expect("scheme regex"));

const BLOCKED_SCHEMES: [&str; 3] = ["javascript", "vbscript", "data"];
const ALLOWED_SCHEMES: [&str; 5] = ["http", "https", "mailto", "tel", "ftp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemoteReason {
    UnsafeScheme,
    /// A character reference survived decoding.
    Undecodable,
    Empty,
    BareFragment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkSafety {
    /// Keep the link unchanged.
    Safe(String),
    /// Protocol-relative link resolved against the secure scheme.
    Rewritten(String),
    /// Root-relative link, kept with `rel="nofollow"`.
    Nofollow(String),
    /// Protocol-relative link without a usable host; render the text in a neutral wrapper.
    Unresolvable,
    /// Not a link; keep the anchor text only.
    Demote(DemoteReason),
}

impl LinkSafety {
    pub fn href(&self) -> Option<&str> {
        match self {
            LinkSafety::Safe(h) | LinkSafety::Rewritten(h) | LinkSafety::Nofollow(h) => Some(h),
            LinkSafety::Unresolvable | LinkSafety::Demote(_) => None,
        }
    }
}

/// Classifies a raw `href`/`src` attribute value as it appears in source markup.
///
/// Character references are decoded exactly once; returned hrefs are decoded values.
pub fn classify_href(raw: &str) -> LinkSafety {
    let decoded = decode_attr_value(raw);
    let trimmed = decoded.trim();
    // Browsers ignore embedded tabs/newlines/control chars when resolving schemes.
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();

    if cleaned.contains("&#") {
        return LinkSafety::Demote(DemoteReason::Undecodable);
    }
    if cleaned.is_empty() {
        return LinkSafety::Demote(DemoteReason::Empty);
    }
    if cleaned == "#" {
        return LinkSafety::Demote(DemoteReason::BareFragment);
    }

    let lowered = cleaned.to_ascii_lowercase();
    if let Some(caps) = SCHEME_RE.captures(&lowered) {
        let scheme = &caps[1];
        if BLOCKED_SCHEMES.contains(&scheme) || !ALLOWED_SCHEMES.contains(&scheme) {
            return LinkSafety::Demote(DemoteReason::UnsafeScheme);
        }
        return LinkSafety::Safe(trimmed.to_string());
    }

    let slashed = cleaned.replace('\\', "/");
    if let Some(rest) = slashed.strip_prefix("//") {
        return match resolvable_host(rest) {
            Some(_) => LinkSafety::Rewritten(format!("{SECURE_SCHEME}{slashed}")),
            None => LinkSafety::Unresolvable,
        };
    }
    if slashed.starts_with('/') {
        return LinkSafety::Nofollow(trimmed.to_string());
    }
    LinkSafety::Safe(trimmed.to_string())
}

fn resolvable_host(after_slashes: &str) -> Option<&str> {
    let end = after_slashes
        .find(['/', '?', '#'])
        .unwrap_or(after_slashes.len());
    let authority = &after_slashes[..end];
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host_only = host.split(':').next().unwrap_or(host);
    let valid = !host_only.is_empty()
        && host_only
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
        && host_only.chars().any(|c| c.is_alphanumeric());
    valid.then_some(host)
}
