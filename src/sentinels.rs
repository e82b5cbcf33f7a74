use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

pub const SEG_ID_WIDTH: usize = 6;
pub const NT_ID_WIDTH: usize = 4;

pub fn nt_token(nt_id: usize) -> String {
    format!("<<MT_NT:{nt_id:0NT_ID_WIDTH$}>>")
}

pub fn seg_start(seg_id: usize) -> String {
    format!("<<MT_SEG:{seg_id:0SEG_ID_WIDTH$}>>")
}

pub fn seg_end(seg_id: usize) -> String {
    format!("<<MT_END:{seg_id:0SEG_ID_WIDTH$}>>")
}

pub static ANY_SENTINEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<MT_(?:NT:\d{4,}|SEG:\d{6}|END:\d{6})>>").expect("sentinel regex")
});

// Anything shaped like one of our markers. Broader than ANY_SENTINEL_RE so hallucinated
// <<MT_...>> tokens in model output can be detected.
pub static ANY_MT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<MT_[A-Za-z0-9_:\-]{1,64}>>").expect("mt token regex"));

pub static NT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<MT_NT:(\d{4,})>>").expect("nt regex"));

/// Wraps `text` in start/end markers for segment `seg_id`, one marker per line.
pub fn wrap_segment(seg_id: usize, text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 48);
    out.push_str(&seg_start(seg_id));
    out.push('\n');
    out.push_str(text);
    out.push('\n');
    out.push_str(&seg_end(seg_id));
    out
}

pub fn parse_segmented_output(
    text: &str,
    expected_ids: &[usize],
) -> anyhow::Result<HashMap<usize, String>> {
    let mut segments: HashMap<usize, String> = HashMap::new();
    let mut cursor = 0usize;
    for &seg_id in expected_ids {
        let start_marker = seg_start(seg_id);
        let end_marker = seg_end(seg_id);

        let start_idx = text[cursor..]
            .find(&start_marker)
            .map(|i| cursor + i)
            .with_context(|| format!("missing SEG start for id={seg_id}"))?;
        let start_end = start_idx + start_marker.len();

        let end_idx = text[start_end..]
            .find(&end_marker)
            .map(|i| start_end + i)
            .with_context(|| format!("missing SEG end for id={seg_id}"))?;

        segments.insert(seg_id, strip_marker_newlines(&text[start_end..end_idx]).to_string());
        cursor = end_idx + end_marker.len();
    }
    Ok(segments)
}

// Markers sit on their own lines; drop exactly the line breaks they introduced.
fn strip_marker_newlines(body: &str) -> &str {
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}
