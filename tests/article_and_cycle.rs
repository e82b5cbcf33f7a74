use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use news_lingo::error::{ProviderError, StoreError};
use news_lingo::pipeline::{ArticleRequest, ContentPipeline, LanguageStatus};
use news_lingo::pretranslate::{pivot_hash, CycleOptions, Pretranslator};
use news_lingo::provider::{CompletionProvider, CompletionRequest};
use news_lingo::sentinels::{parse_segmented_output, wrap_segment};
use news_lingo::store::{
    ClusterStore, Market, MemoryStore, NewClusterAiRecord, RenderKind, RenderStore,
};
use news_lingo::translate::{TranslationCache, TranslationClient};

/// Scripted provider: upper-cases the segment between the markers and counts calls.
#[derive(Default)]
struct ScriptedProvider {
    calls: AtomicUsize,
    fail_langs: Vec<&'static str>,
    delay: Option<Duration>,
}

fn target_of(prompt: &str) -> String {
    prompt
        .split(" to ")
        .nth(1)
        .and_then(|s| s.split('(').nth(1))
        .and_then(|s| s.split(')').next())
        .unwrap_or("?")
        .to_string()
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, req: CompletionRequest<'_>) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_langs.contains(&target_of(req.prompt).as_str()) {
            return Err(ProviderError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        let segs = parse_segmented_output(req.prompt, &[1])
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(wrap_segment(1, &segs[&1].to_uppercase()))
    }
}

fn pipeline_with(provider: Arc<ScriptedProvider>) -> ContentPipeline {
    let client = TranslationClient::new(provider, Arc::new(TranslationCache::new()));
    ContentPipeline::new(client)
}

async fn seeded_store(langs: &[&str]) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store
        .upsert_market(Market {
            id: "us".into(),
            pivot_lang: "en".into(),
            pretranslate_langs: langs.iter().map(|l| l.to_string()).collect(),
            enabled: true,
        })
        .expect("market");
    store.touch_cluster("c1", Utc::now()).expect("touch");
    store
        .insert_current_record(NewClusterAiRecord {
            cluster_id: "c1".into(),
            lang: "en".into(),
            title: "Storm hits coast".into(),
            summary: "A storm made landfall.".into(),
            details: "<p>Winds reached <b>150 km/h</b>.</p><pre>raw &lt;data&gt;</pre>".into(),
            pivot_hash: None,
            provenance: None,
        })
        .await
        .expect("pivot");
    Arc::new(store)
}

fn quiet_cycle() -> CycleOptions {
    CycleOptions {
        concurrency: 2,
        ..CycleOptions::default()
    }
}

#[tokio::test]
async fn second_cycle_is_idempotent_and_new_language_adds_one_job() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = seeded_store(&["de", "fr", "en"]).await;
    let runner = Pretranslator::new(store.clone(), pipeline_with(provider.clone())).with_progress(false);

    let first = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(first.clusters_scanned, 1);
    assert_eq!(first.jobs_created, 2);
    assert_eq!(first.translations_inserted, 2);
    assert!(first.failures.is_empty());

    let de = store.current_record("c1", "de").await.expect("read").expect("de");
    assert_eq!(de.title, "STORM HITS COAST");
    assert!(de.details.contains("<pre>raw &lt;data&gt;</pre>"));
    let hash = pivot_hash(
        "Storm hits coast",
        "A storm made landfall.",
        "<p>Winds reached <b>150 km/h</b>.</p><pre>raw &lt;data&gt;</pre>",
    );
    assert_eq!(de.pivot_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(
        de.provenance.as_deref(),
        Some(format!("pretranslate:en->de:{hash}").as_str())
    );

    let calls_after_first = provider.calls.load(Ordering::SeqCst);
    let second = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(second.jobs_created, 0);
    assert_eq!(second.translations_inserted, 0);
    assert_eq!(second.skipped_fresh, 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_first);

    store
        .upsert_market(Market {
            id: "us".into(),
            pivot_lang: "en".into(),
            pretranslate_langs: vec!["de".into(), "fr".into(), "es".into()],
            enabled: true,
        })
        .expect("market");
    let third = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(third.jobs_created, 1);
    assert_eq!(third.planned[0].lang, "es");
    assert_eq!(store.history("c1", "de").expect("history").len(), 1);
}

#[tokio::test]
async fn changed_pivot_retranslates_and_demotes_old_rows() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = seeded_store(&["de"]).await;
    let runner = Pretranslator::new(store.clone(), pipeline_with(provider)).with_progress(false);
    runner.run_cycle(&quiet_cycle()).await.expect("cycle");

    store
        .insert_current_record(NewClusterAiRecord {
            cluster_id: "c1".into(),
            lang: "en".into(),
            title: "Storm weakens".into(),
            summary: "The storm weakened.".into(),
            details: "<p>Update.</p>".into(),
            pivot_hash: None,
            provenance: None,
        })
        .await
        .expect("pivot");
    let summary = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(summary.translations_inserted, 1);

    let history = store.history("c1", "de").expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|r| r.is_current).count(), 1);
    assert_eq!(history[1].title, "STORM WEAKENS");
}

#[tokio::test]
async fn crossed_markets_never_overwrite_each_others_pivot() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = seeded_store(&["de", "fr"]).await;
    store
        .upsert_market(Market {
            id: "de-market".into(),
            pivot_lang: "de".into(),
            pretranslate_langs: vec!["en".into(), "fr".into()],
            enabled: true,
        })
        .expect("market");
    store
        .insert_current_record(NewClusterAiRecord {
            cluster_id: "c1".into(),
            lang: "de".into(),
            title: "Sturm trifft Kueste".into(),
            summary: "Ein Sturm erreichte Land.".into(),
            details: "<p>Redaktionell.</p>".into(),
            pivot_hash: None,
            provenance: None,
        })
        .await
        .expect("de pivot");
    let runner = Pretranslator::new(store.clone(), pipeline_with(provider.clone())).with_progress(false);

    let first = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(first.jobs_created, 1, "{:?}", first.planned);
    assert_eq!(first.planned[0].lang, "fr");
    assert_eq!(first.skipped_pivot_lang, 2);

    let second = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(second.jobs_created, 0, "{:?}", second.planned);
    assert_eq!(second.translations_inserted, 0);

    let en = store.current_record("c1", "en").await.expect("read").expect("en");
    assert_eq!(en.title, "Storm hits coast");
    assert!(en.provenance.is_none());
    let de = store.current_record("c1", "de").await.expect("read").expect("de");
    assert_eq!(de.title, "Sturm trifft Kueste");
    assert_eq!(store.history("c1", "de").expect("history").len(), 1);
    assert_eq!(store.history("c1", "en").expect("history").len(), 1);
}

#[tokio::test]
async fn authored_records_are_not_replaced() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = seeded_store(&["de"]).await;
    store
        .insert_current_record(NewClusterAiRecord {
            cluster_id: "c1".into(),
            lang: "de".into(),
            title: "Von Hand".into(),
            summary: "Redaktion.".into(),
            details: "<p>Text.</p>".into(),
            pivot_hash: None,
            provenance: None,
        })
        .await
        .expect("authored");
    let runner = Pretranslator::new(store.clone(), pipeline_with(provider.clone())).with_progress(false);

    let summary = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(summary.jobs_created, 0);
    assert_eq!(summary.skipped_authored, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    let de = store.current_record("c1", "de").await.expect("read").expect("de");
    assert_eq!(de.title, "Von Hand");
}

#[tokio::test]
async fn missing_pivot_dry_run_and_failures_are_reported() {
    let provider = Arc::new(ScriptedProvider {
        fail_langs: vec!["fr"],
        ..ScriptedProvider::default()
    });
    let store = seeded_store(&["de", "fr"]).await;
    store.touch_cluster("c2", Utc::now()).expect("touch");
    let runner = Pretranslator::new(store.clone(), pipeline_with(provider.clone())).with_progress(false);

    let dry = runner
        .run_cycle(&CycleOptions {
            dry_run: true,
            ..quiet_cycle()
        })
        .await
        .expect("dry run");
    assert_eq!(dry.jobs_created, 2);
    assert_eq!(dry.skipped_no_pivot, 1);
    assert_eq!(dry.translations_inserted, 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

    let summary = runner.run_cycle(&quiet_cycle()).await.expect("cycle");
    assert_eq!(summary.translations_inserted, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].cluster_id, "c1");
    assert_eq!(summary.failures[0].lang, "fr");
    assert_eq!(summary.failures[0].reason, "provider_error");
    assert!(store.current_record("c1", "fr").await.expect("read").is_none());
    assert!(store.current_record("c1", "de").await.expect("read").is_some());
}

#[tokio::test(start_paused = true)]
async fn slow_job_times_out_without_writing() {
    let provider = Arc::new(ScriptedProvider {
        delay: Some(Duration::from_secs(30)),
        ..ScriptedProvider::default()
    });
    let store = seeded_store(&["de"]).await;
    let runner = Pretranslator::new(store.clone(), pipeline_with(provider)).with_progress(false);

    let summary = runner
        .run_cycle(&CycleOptions {
            per_item_timeout: Duration::from_millis(50),
            ..quiet_cycle()
        })
        .await
        .expect("cycle");
    assert_eq!(summary.translations_inserted, 0);
    assert_eq!(summary.failures[0].reason, "timeout");
    assert!(store.current_record("c1", "de").await.expect("read").is_none());
}

#[tokio::test]
async fn article_outputs_keep_verbatim_bytes_and_long_text() {
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = pipeline_with(provider);

    let sentence = "The council approved the budget after a long debate. ";
    let long_text: String = sentence.repeat(250);
    let verbatim = "<pre>  fn main() {\n    if a < b && c > d { x(); }\n}\n</pre>";
    let raw = format!("<h1>Budget</h1><p>{long_text}</p>{verbatim}<p>End of story.</p>");
    let langs = vec!["de".to_string(), "fr".into(), "ar".into()];

    let report = pipeline.process(&raw, "en", &langs).await;
    assert!(report.cleaned_html.contains(verbatim));
    let trimmed = long_text.trim_end();
    let head = &trimmed[..50];
    let tail = &trimmed[trimmed.len() - 50..];
    for result in &report.results {
        assert_eq!(result.status, LanguageStatus::Ok, "{}", result.lang);
        let html = result.html.as_deref().expect("html");
        assert!(html.contains(verbatim), "{}", result.lang);
        assert!(html.contains(&head.to_uppercase()), "{}", result.lang);
        assert!(html.contains(&tail.to_uppercase()), "{}", result.lang);
        assert!(result.chunks >= 2, "{}", result.lang);
    }
    assert!(report.results[2].html.as_deref().expect("ar").contains("<h1 dir=\"rtl\">"));
}

/// Delegates to a [`MemoryStore`] but refuses translation writes for one language.
struct FlakyStore {
    inner: MemoryStore,
    reject: &'static str,
}

#[async_trait]
impl RenderStore for FlakyStore {
    async fn upsert_cleaned(&self, article_id: &str, lang: &str, html: &str) -> Result<(), StoreError> {
        self.inner.upsert_cleaned(article_id, lang, html).await
    }

    async fn upsert_translation(
        &self,
        article_id: &str,
        lang: &str,
        html: &str,
    ) -> Result<(), StoreError> {
        if lang == self.reject {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.upsert_translation(article_id, lang, html).await
    }
}

#[tokio::test]
async fn persistence_failure_only_affects_its_language() {
    let provider = Arc::new(ScriptedProvider::default());
    let pipeline = pipeline_with(provider);
    let store = FlakyStore {
        inner: MemoryStore::new(),
        reject: "fr",
    };
    let langs = vec!["de".to_string(), "fr".into(), "de".into()];
    let report = pipeline
        .process_and_persist_article(
            &store,
            ArticleRequest {
                article_id: "a9",
                raw_html: "<p>Hello <a href=\"javascript:evil()\">there</a></p>",
                source_lang: "en",
                target_langs: &langs,
            },
        )
        .await;

    assert_eq!(report.cleaned_status, LanguageStatus::Ok);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].status, LanguageStatus::Ok);
    assert_eq!(report.results[1].status, LanguageStatus::PersistenceError);
    assert!(report.results[1].message.as_deref().unwrap_or_default().contains("disk full"));

    let de = store
        .inner
        .rendered("a9", "de", RenderKind::Translation)
        .expect("read")
        .expect("de");
    assert!(!de.html.contains("javascript"));
    assert!(store.inner.rendered("a9", "fr", RenderKind::Translation).expect("read").is_none());
}
