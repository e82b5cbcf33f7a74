//! Sanitize → chunk → translate per language → persist.

use std::collections::{BTreeMap, HashSet};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::{chunk, reassemble, ChunkPolicy};
use crate::error::{StoreError, TranslateError};
use crate::html::{active_content, sanitize};
use crate::ir::{render_nodes, Chunk};
use crate::store::RenderStore;
use crate::translate::{apply_direction, TranslationClient};

pub mod config;
pub mod prompts;
pub mod trace;

pub use config::{init_default_config, ConfigOverrides, PipelineConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageStatus {
    Ok,
    /// Empty language tag; nothing was requested.
    Skipped,
    ProviderError,
    IntegrityError,
    PersistenceError,
}

#[derive(Clone, Debug, Serialize)]
pub struct LanguageResult {
    pub lang: String,
    pub status: LanguageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LanguageResult {
    fn failed(lang: &str, status: LanguageStatus, chunks: usize, message: String) -> Self {
        Self {
            lang: lang.to_string(),
            status,
            html: None,
            chunks,
            message: Some(message),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == LanguageStatus::Ok
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessReport {
    pub cleaned_html: String,
    pub cleaned_bytes: usize,
    pub results: Vec<LanguageResult>,
}

#[derive(Clone, Debug)]
pub struct ArticleRequest<'a> {
    pub article_id: &'a str,
    pub raw_html: &'a str,
    pub source_lang: &'a str,
    pub target_langs: &'a [String],
}

#[derive(Clone, Debug, Serialize)]
pub struct ArticleReport {
    pub article_id: String,
    pub cleaned_bytes: usize,
    pub cleaned_status: LanguageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_message: Option<String>,
    pub results: Vec<LanguageResult>,
}

/// Runs the sanitizer once per article and fans translation out per target language.
#[derive(Clone)]
pub struct ContentPipeline {
    client: TranslationClient,
    policy: ChunkPolicy,
    chunk_concurrency: usize,
    language_concurrency: usize,
}

impl ContentPipeline {
    pub fn new(client: TranslationClient) -> Self {
        Self {
            client,
            policy: ChunkPolicy::default(),
            chunk_concurrency: 1,
            language_concurrency: 4,
        }
    }

    pub fn with_policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Zero is treated as one.
    pub fn with_concurrency(mut self, chunks: usize, languages: usize) -> Self {
        self.chunk_concurrency = chunks.max(1);
        self.language_concurrency = languages.max(1);
        self
    }

    pub fn client(&self) -> &TranslationClient {
        &self.client
    }

    /// Sanitizes `raw_html` and translates it into every target language. Never fails as a
    /// whole; each language carries its own status.
    pub async fn process(
        &self,
        raw_html: &str,
        source_lang: &str,
        target_langs: &[String],
    ) -> ProcessReport {
        let nodes = sanitize(raw_html);
        let cleaned_html = render_nodes(&nodes);
        let chunks = chunk(&nodes, self.policy);
        let langs = dedup_langs(target_langs);
        info!(
            nodes = nodes.len(),
            chunks = chunks.len(),
            langs = langs.len(),
            cleaned_bytes = cleaned_html.len(),
            "content prepared"
        );

        let results: Vec<LanguageResult> = stream::iter(
            langs
                .iter()
                .map(|lang| self.translate_language(&chunks, source_lang, lang)),
        )
        .buffered(self.language_concurrency)
        .collect()
        .await;

        ProcessReport {
            cleaned_bytes: cleaned_html.len(),
            cleaned_html,
            results,
        }
    }

    /// [`process`](Self::process) plus persistence of the cleaned record and each successful
    /// translation. A failed write only affects the record it was for.
    pub async fn process_and_persist_article<S>(
        &self,
        store: &S,
        req: ArticleRequest<'_>,
    ) -> ArticleReport
    where
        S: RenderStore + ?Sized,
    {
        let mut report = self
            .process(req.raw_html, req.source_lang, req.target_langs)
            .await;

        let (cleaned_status, cleaned_message) = match store
            .upsert_cleaned(req.article_id, req.source_lang, &report.cleaned_html)
            .await
        {
            Ok(()) => (LanguageStatus::Ok, None),
            Err(e) => {
                warn!(article_id = req.article_id, error = %e, "cleaned upsert failed");
                (LanguageStatus::PersistenceError, Some(e.to_string()))
            }
        };

        for result in report.results.iter_mut().filter(|r| r.is_ok()) {
            let html = result.html.as_deref().unwrap_or_default();
            if let Err(e) = store
                .upsert_translation(req.article_id, &result.lang, html)
                .await
            {
                warn!(article_id = req.article_id, lang = %result.lang, error = %e, "translation upsert failed");
                mark_persistence_failure(result, &e);
            }
        }

        let ok = report.results.iter().filter(|r| r.is_ok()).count();
        info!(
            article_id = req.article_id,
            ok,
            failed = report.results.len() - ok,
            "article processed"
        );
        ArticleReport {
            article_id: req.article_id.to_string(),
            cleaned_bytes: report.cleaned_bytes,
            cleaned_status,
            cleaned_message,
            results: report.results,
        }
    }

    async fn translate_language(
        &self,
        chunks: &[Chunk],
        source_lang: &str,
        lang: &str,
    ) -> LanguageResult {
        if lang.trim().is_empty() {
            return LanguageResult {
                lang: lang.to_string(),
                status: LanguageStatus::Skipped,
                html: None,
                chunks: 0,
                message: Some("empty language tag".to_string()),
            };
        }

        let count = chunks.iter().filter(|c| c.is_translatable()).count();
        let translated = match self.translate_chunks(chunks, source_lang, lang).await {
            Ok(t) => t,
            Err(e) => {
                let status = match e {
                    TranslateError::Provider(_) => LanguageStatus::ProviderError,
                    TranslateError::Integrity(_) => LanguageStatus::IntegrityError,
                };
                warn!(lang, error = %e, "language failed");
                return LanguageResult::failed(lang, status, count, e.to_string());
            }
        };

        match reassemble_checked(chunks, &translated) {
            Ok(html) => LanguageResult {
                lang: lang.to_string(),
                status: LanguageStatus::Ok,
                html: Some(apply_direction(&html, lang)),
                chunks: count,
                message: None,
            },
            Err(e) => {
                warn!(lang, error = %e, "reassembled output rejected");
                LanguageResult::failed(lang, LanguageStatus::IntegrityError, count, e.to_string())
            }
        }
    }

    /// Sanitizes and translates one fragment without direction annotation, for stored
    /// derived records that are rendered later.
    pub async fn translate_fragment(
        &self,
        html: &str,
        source_lang: &str,
        lang: &str,
    ) -> Result<String, TranslateError> {
        let nodes = sanitize(html);
        let chunks = chunk(&nodes, self.policy);
        let translated = self.translate_chunks(&chunks, source_lang, lang).await?;
        reassemble_checked(&chunks, &translated)
    }

    async fn translate_chunks(
        &self,
        chunks: &[Chunk],
        source_lang: &str,
        lang: &str,
    ) -> Result<BTreeMap<usize, String>, TranslateError> {
        stream::iter(chunks.iter().filter(|c| c.is_translatable()).map(|c| async move {
            self.client
                .translate_segment(c.source(), source_lang, lang)
                .await
                .map(|t| (c.index, t))
        }))
        .buffered(self.chunk_concurrency)
        .try_collect()
        .await
    }
}

/// Reassembles translated chunks and rejects output that a browser would treat as active.
fn reassemble_checked(
    chunks: &[Chunk],
    translated: &BTreeMap<usize, String>,
) -> Result<String, TranslateError> {
    let html =
        reassemble(chunks, translated).map_err(|e| TranslateError::Integrity(e.to_string()))?;
    let active = active_content(&html);
    if !active.is_empty() {
        return Err(TranslateError::Integrity(format!(
            "active content in output: {}",
            active.join(", ")
        )));
    }
    Ok(html)
}

fn mark_persistence_failure(result: &mut LanguageResult, e: &StoreError) {
    result.status = LanguageStatus::PersistenceError;
    result.message = Some(e.to_string());
    result.html = None;
}

/// Trims tags and drops repeats, keeping first occurrence order. Empty tags are kept once so
/// the caller sees them reported as skipped.
fn dedup_langs(langs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    langs
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| seen.insert(l.to_ascii_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{CompletionProvider, CompletionRequest};
    use crate::sentinels::{parse_segmented_output, wrap_segment};
    use crate::store::{MemoryStore, RenderKind};
    use crate::translate::TranslationCache;

    /// Upper-cases each segment; fails for target languages listed in `fail`.
    struct UpperProvider {
        fail: Vec<&'static str>,
    }

    #[async_trait]
    impl CompletionProvider for UpperProvider {
        fn name(&self) -> &str {
            "upper"
        }

        async fn complete(&self, req: CompletionRequest<'_>) -> Result<String, ProviderError> {
            let target = req
                .prompt
                .split(" to ")
                .nth(1)
                .and_then(|s| s.split('(').nth(1))
                .and_then(|s| s.split(')').next())
                .unwrap_or("?")
                .to_string();
            if self.fail.contains(&target.as_str()) {
                return Err(ProviderError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            let segs = parse_segmented_output(req.prompt, &[1])
                .map_err(|e| ProviderError::Other(e.to_string()))?;
            Ok(wrap_segment(1, &segs[&1].to_uppercase()))
        }
    }

    /// Appends an image with an inline handler to every translated segment.
    struct InjectingProvider;

    #[async_trait]
    impl CompletionProvider for InjectingProvider {
        fn name(&self) -> &str {
            "injecting"
        }

        async fn complete(&self, req: CompletionRequest<'_>) -> Result<String, ProviderError> {
            let segs = parse_segmented_output(req.prompt, &[1])
                .map_err(|e| ProviderError::Other(e.to_string()))?;
            Ok(wrap_segment(1, &format!("{} <img src=x onerror=alert(1)>", segs[&1])))
        }
    }

    fn pipeline(fail: Vec<&'static str>) -> ContentPipeline {
        let client = TranslationClient::new(
            Arc::new(UpperProvider { fail }),
            Arc::new(TranslationCache::new()),
        );
        ContentPipeline::new(client)
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let langs = vec!["de".to_string(), " fr".into(), "DE".into(), "".into(), " ".into()];
        assert_eq!(dedup_langs(&langs), vec!["de", "fr", ""]);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_language() {
        let p = pipeline(vec!["fr"]);
        let langs = vec!["de".to_string(), "fr".into(), "".into()];
        let report = p
            .process("<p>Hello</p><pre> keep\n  me </pre>", "en", &langs)
            .await;
        assert!(report.cleaned_bytes > 0);
        let statuses: Vec<LanguageStatus> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                LanguageStatus::Ok,
                LanguageStatus::ProviderError,
                LanguageStatus::Skipped
            ]
        );
        assert_eq!(
            report.results[0].html.as_deref(),
            Some("<p>HELLO</p><pre> keep\n  me </pre>")
        );
    }

    #[tokio::test]
    async fn markup_in_model_output_stays_inert() {
        let client = TranslationClient::new(Arc::new(InjectingProvider), Arc::new(TranslationCache::new()));
        let p = ContentPipeline::new(client);
        let report = p.process("<p>Hello <b>there</b></p>", "en", &["de".to_string()]).await;
        assert_eq!(report.results[0].status, LanguageStatus::Ok);
        let html = report.results[0].html.as_deref().expect("html");
        assert!(html.contains("&lt;img src=x onerror=alert(1)>"), "{html}");
        assert!(active_content(html).is_empty());
    }

    #[test]
    fn active_reassembled_output_is_an_integrity_error() {
        let chunks = chunk(&sanitize("<p>Hello</p>"), ChunkPolicy::default());
        let idx = chunks
            .iter()
            .find(|c| c.is_translatable())
            .map(|c| c.index)
            .expect("text chunk");
        let translated = BTreeMap::from([(idx, "<img src=x onerror=alert(1)>".to_string())]);
        let err = reassemble_checked(&chunks, &translated).expect_err("must fail");
        assert!(matches!(err, TranslateError::Integrity(m) if m.contains("onerror")));
    }

    #[tokio::test]
    async fn rtl_language_output_is_annotated() {
        let p = pipeline(vec![]);
        let report = p.process("<p>Hi</p>", "en", &["he".to_string()]).await;
        assert_eq!(report.results[0].html.as_deref(), Some("<p dir=\"rtl\">HI</p>"));
    }

    #[tokio::test]
    async fn persists_cleaned_and_successful_languages() {
        let p = pipeline(vec!["it"]);
        let store = MemoryStore::new();
        let langs = vec!["de".to_string(), "it".into()];
        let report = p
            .process_and_persist_article(
                &store,
                ArticleRequest {
                    article_id: "a1",
                    raw_html: "<p onclick=\"x()\">Hello</p>",
                    source_lang: "en",
                    target_langs: &langs,
                },
            )
            .await;
        assert_eq!(report.cleaned_status, LanguageStatus::Ok);
        let cleaned = store.rendered("a1", "en", RenderKind::Cleaned).expect("read").expect("some");
        assert_eq!(cleaned.html, "<p>Hello</p>");
        assert!(store.rendered("a1", "de", RenderKind::Translation).expect("read").is_some());
        assert!(store.rendered("a1", "it", RenderKind::Translation).expect("read").is_none());

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["results"][1]["status"], "provider_error");
    }
}
