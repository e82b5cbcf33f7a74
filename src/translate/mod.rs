//! Segment translation over a completion provider, with a shared content-addressed cache.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::TranslateError;
use crate::freezer::{freeze_text, unfreeze_text};
use crate::pipeline::prompts::{render_template, DEFAULT_TRANSLATE_TEXT, TRANSLATE_SYSTEM_TEXT};
use crate::pipeline::trace::TraceWriter;
use crate::provider::{CompletionProvider, CompletionRequest};
use crate::quality::{soft_flags, validate_translation};
use crate::sentinels::{parse_segmented_output, wrap_segment, NT_RE};
use crate::textutil::{is_trivial_sentinel_text, lang_label, same_language, split_outer_whitespace};

pub mod cache;
pub mod direction;

pub use cache::{cache_key, CacheStats, TranslationCache};
pub use direction::apply_direction;

const SEG_ID: usize = 1;

#[derive(Clone, Copy, Debug)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Cheap to clone; clones share the provider, cache and trace writer.
#[derive(Clone)]
pub struct TranslationClient {
    provider: Arc<dyn CompletionProvider>,
    cache: Arc<TranslationCache>,
    prompt: Arc<str>,
    sampling: Sampling,
    trace: Arc<TraceWriter>,
}

impl TranslationClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, cache: Arc<TranslationCache>) -> Self {
        Self {
            provider,
            cache,
            prompt: Arc::from(DEFAULT_TRANSLATE_TEXT),
            sampling: Sampling::default(),
            trace: Arc::new(TraceWriter::disabled()),
        }
    }

    /// Template with `{{source_lang}}`, `{{target_lang}}` and `{{segment}}` placeholders.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt: String = prompt.into();
        self.prompt = Arc::from(prompt);
        self
    }

    pub fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = Arc::new(trace);
        self
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    /// Translates an HTML fragment. Returns `Ok(None)` when no destination language is given.
    ///
    /// The result carries `dir="rtl"` annotations for right-to-left destinations.
    pub async fn translate(
        &self,
        text: &str,
        src: &str,
        dst: &str,
    ) -> Result<Option<String>, TranslateError> {
        if dst.trim().is_empty() {
            return Ok(None);
        }
        let out = self.translate_segment(text, src, dst).await?;
        Ok(Some(apply_direction(&out, dst)))
    }

    /// Translates one segment without direction post-processing.
    pub async fn translate_segment(
        &self,
        text: &str,
        src: &str,
        dst: &str,
    ) -> Result<String, TranslateError> {
        let (lead, core, trail) = split_outer_whitespace(text);
        if core.is_empty() || same_language(src, dst) {
            return Ok(text.to_string());
        }

        let frozen = freeze_text(core);
        if is_trivial_sentinel_text(&frozen.text) {
            return Ok(text.to_string());
        }

        if let Some(hit) = self.cache.get(src, dst, core) {
            debug!(lang = dst, chars = core.len(), "cache hit");
            return Ok(format!("{lead}{hit}{trail}"));
        }

        let key = cache_key(src, dst, core);
        let prompt = render_template(
            &self.prompt,
            &[
                ("source_lang", &lang_label(src)),
                ("target_lang", &lang_label(dst)),
                ("segment", &wrap_segment(SEG_ID, &frozen.text)),
            ],
        );
        self.trace_text(dst, &key, "prompt", &prompt);

        let raw = self
            .provider
            .complete(CompletionRequest {
                system: Some(TRANSLATE_SYSTEM_TEXT),
                prompt: &prompt,
                temperature: self.sampling.temperature,
                max_tokens: self.sampling.max_tokens,
            })
            .await?;
        self.trace_text(dst, &key, "response", &raw);

        let body = extract_segment(&raw);
        validate_translation(&frozen.text, &frozen.nt_map, &body)
            .map_err(|e| TranslateError::Integrity(e.to_string()))?;
        let flags = soft_flags(&frozen.text, &body);
        if !flags.is_empty() {
            debug!(lang = dst, flags = ?flags, "soft quality flags");
        }

        let restored = unfreeze_text(&escape_model_markup(&body), &frozen.nt_map);
        self.cache.insert(src, dst, core, &restored);
        Ok(format!("{lead}{restored}{trail}"))
    }

    fn trace_text(&self, lang: &str, key: &str, stage: &str, text: &str) {
        if let Err(e) = self.trace.write_segment_text(lang, key, stage, text) {
            warn!(error = %e, "trace write failed");
        }
    }
}

/// Escapes every `<` the model wrote outside a sentinel. Markup only returns through unfreezing.
fn escape_model_markup(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut pos = 0usize;
    for m in NT_RE.find_iter(body) {
        out.push_str(&body[pos..m.start()].replace('<', "&lt;"));
        out.push_str(m.as_str());
        pos = m.end();
    }
    out.push_str(&body[pos..].replace('<', "&lt;"));
    out
}

// Marker-delimited body when present, else the whole cleaned reply.
fn extract_segment(raw: &str) -> String {
    match parse_segmented_output(raw, &[SEG_ID]) {
        Ok(mut segs) => segs.remove(&SEG_ID).unwrap_or_default().trim().to_string(),
        Err(_) => cleanup_model_text(raw),
    }
}

fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim().to_string();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = s[i + 1..].to_string();
        }
        if let Some(end) = s.rfind("```") {
            s = s[..end].to_string();
        }
    }
    s.trim().trim_matches('"').trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::ProviderError;

    /// Replies with the segment body upper-cased, wrapped in the same markers.
    struct UpperProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionProvider for UpperProvider {
        fn name(&self) -> &str {
            "upper"
        }

        async fn complete(&self, req: CompletionRequest<'_>) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let segs = parse_segmented_output(req.prompt, &[SEG_ID])
                .map_err(|e| ProviderError::Other(e.to_string()))?;
            let body = segs.get(&SEG_ID).cloned().unwrap_or_default();
            Ok(wrap_segment(SEG_ID, &body.to_uppercase()))
        }
    }

    struct FixedProvider(&'static str);

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _req: CompletionRequest<'_>) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    fn client() -> (TranslationClient, Arc<UpperProvider>) {
        let provider = Arc::new(UpperProvider {
            calls: AtomicUsize::new(0),
        });
        let c = TranslationClient::new(provider.clone(), Arc::new(TranslationCache::new()));
        (c, provider)
    }

    #[tokio::test]
    async fn empty_destination_returns_none_without_calling() {
        let (c, p) = client();
        assert_eq!(c.translate("Hello", "en", "").await.expect("ok"), None);
        assert_eq!(c.translate("Hello", "en", "  ").await.expect("ok"), None);
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_call_hits_cache() {
        let (c, p) = client();
        let a = c.translate("<p>Hello <b>world</b></p>", "en", "de").await.expect("a");
        let b = c.translate("<p>Hello <b>world</b></p>", "en", "de").await.expect("b");
        assert_eq!(a.as_deref(), Some("<p>HELLO <b>WORLD</b></p>"));
        assert_eq!(a, b);
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn outer_whitespace_and_trivial_segments_are_kept() {
        let (c, p) = client();
        let out = c.translate_segment("\n  Hello  \n", "en", "fr").await.expect("ok");
        assert_eq!(out, "\n  HELLO  \n");
        let markup_only = c.translate_segment("<br> 2024 &amp; ", "en", "fr").await.expect("ok");
        assert_eq!(markup_only, "<br> 2024 &amp; ");
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_language_is_passthrough() {
        let (c, p) = client();
        let out = c.translate("<p>Hi</p>", "en-GB", "EN").await.expect("ok");
        assert_eq!(out.as_deref(), Some("<p>Hi</p>"));
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rtl_destination_marks_root() {
        let (c, _) = client();
        let out = c.translate("<p>salam</p>", "en", "ar").await.expect("ok");
        assert_eq!(out.as_deref(), Some("<p dir=\"rtl\">SALAM</p>"));
        let ltr = c.translate("<p>salam</p>", "en", "de").await.expect("ok");
        assert_eq!(ltr.as_deref(), Some("<p>SALAM</p>"));
    }

    #[tokio::test]
    async fn dropped_sentinel_is_an_integrity_error() {
        let c = TranslationClient::new(
            Arc::new(FixedProvider("Hallo Welt")),
            Arc::new(TranslationCache::new()),
        );
        let err = c
            .translate_segment("<p>Hello world</p>", "en", "de")
            .await
            .expect_err("must fail");
        assert!(matches!(err, TranslateError::Integrity(_)));
        assert!(c.cache().is_empty());
    }

    #[tokio::test]
    async fn markup_added_by_the_model_is_escaped() {
        let c = TranslationClient::new(
            Arc::new(FixedProvider(
                "<<MT_SEG:000001>>Hallo <img src=x onerror=alert(1)><<MT_NT:0001>>Welt<<MT_NT:0002>><<MT_END:000001>>",
            )),
            Arc::new(TranslationCache::new()),
        );
        let out = c
            .translate_segment("Hello <b>world</b>", "en", "de")
            .await
            .expect("ok");
        assert_eq!(out, "Hallo &lt;img src=x onerror=alert(1)><b>Welt</b>");
        assert!(crate::html::active_content(&out).is_empty());
    }

    #[tokio::test]
    async fn unmarked_reply_falls_back_to_whole_text() {
        let c = TranslationClient::new(
            Arc::new(FixedProvider("```\n\"Hallo Welt\"\n```")),
            Arc::new(TranslationCache::new()),
        );
        let out = c.translate_segment("Hello world", "en", "de").await.expect("ok");
        assert_eq!(out, "Hallo Welt");
    }

    #[tokio::test]
    async fn trace_files_are_written() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (c, _) = client();
        let c = c.with_trace(TraceWriter::new(tmp.path().to_path_buf(), true).expect("trace"));
        c.translate_segment("Hello", "en", "de").await.expect("ok");
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .expect("read dir")
            .filter_map(|e| e.ok().map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|n| n.starts_with("de.seg_") && n.ends_with(".prompt.txt")));
    }
}
