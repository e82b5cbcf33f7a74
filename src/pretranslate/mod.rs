//! Keeps derived-language cluster records in step with their pivot-language record.
//!
//! Freshness is decided by comparing content fingerprints, never timestamps, so running a
//! cycle twice over unchanged pivot content creates no jobs the second time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{JobError, StoreError};
use crate::pipeline::ContentPipeline;
use crate::progress::Progress;
use crate::store::{ClusterAiRecord, ClusterStore, Market, NewClusterAiRecord};
use crate::textutil::same_language;

pub const PROVENANCE_PREFIX: &str = "pretranslate";

/// Lowercase hex SHA-256 of `title + "\n" + summary + "\n" + details`.
pub fn pivot_hash(title: &str, summary: &str, details: &str) -> String {
    let mut h = Sha256::new();
    h.update(title.as_bytes());
    h.update(b"\n");
    h.update(summary.as_bytes());
    h.update(b"\n");
    h.update(details.as_bytes());
    hex::encode(h.finalize())
}

pub fn provenance_tag(pivot_lang: &str, lang: &str, hash: &str) -> String {
    format!("{PROVENANCE_PREFIX}:{pivot_lang}->{lang}:{hash}")
}

/// A current record is fresh when its stored hash, or the hash embedded in its provenance
/// tag, matches `hash`.
pub fn is_fresh(existing: Option<&ClusterAiRecord>, hash: &str) -> bool {
    let Some(rec) = existing.filter(|r| r.is_current) else {
        return false;
    };
    if rec.pivot_hash.as_deref() == Some(hash) {
        return true;
    }
    rec.provenance
        .as_deref()
        .and_then(|p| p.rsplit(':').next())
        .is_some_and(|embedded| embedded == hash)
}

/// True when `rec` was written by a pretranslation cycle rather than authored directly.
pub fn is_pretranslated(rec: &ClusterAiRecord) -> bool {
    rec.provenance
        .as_deref()
        .and_then(|p| p.strip_prefix(PROVENANCE_PREFIX))
        .is_some_and(|rest| rest.starts_with(':'))
}

#[derive(Clone, Debug)]
pub struct CycleOptions {
    pub recent_hours: i64,
    /// Worker pool size; zero is treated as one.
    pub concurrency: usize,
    pub per_item_timeout: Duration,
    /// Plan jobs without running them.
    pub dry_run: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            recent_hours: 48,
            concurrency: 4,
            per_item_timeout: Duration::from_millis(120_000),
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PretranslationJob {
    pub cluster_id: String,
    pub market_id: String,
    pub pivot_lang: String,
    pub lang: String,
    pub pivot_hash: String,
    pub pivot: ClusterAiRecord,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedJob {
    pub cluster_id: String,
    pub market_id: String,
    pub lang: String,
    pub pivot_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub cluster_id: String,
    pub lang: String,
    /// `timeout`, `provider_error`, `integrity_error` or `persistence_error`.
    pub reason: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub clusters_scanned: usize,
    pub jobs_created: usize,
    pub translations_inserted: usize,
    pub skipped_fresh: usize,
    pub skipped_no_pivot: usize,
    /// Targets that are some enabled market's pivot language.
    pub skipped_pivot_lang: usize,
    /// Targets whose current record was not produced by pretranslation.
    pub skipped_authored: usize,
    pub failures: Vec<JobFailure>,
    pub planned: Vec<PlannedJob>,
}

impl CycleSummary {
    fn fail(&mut self, cluster_id: &str, lang: &str, reason: &str, message: String) {
        self.failures.push(JobFailure {
            cluster_id: cluster_id.to_string(),
            lang: lang.to_string(),
            reason: reason.to_string(),
            message,
        });
    }
}

/// Runs pretranslation cycles against a cluster store.
pub struct Pretranslator {
    store: Arc<dyn ClusterStore>,
    pipeline: ContentPipeline,
    progress: bool,
}

impl Pretranslator {
    pub fn new(store: Arc<dyn ClusterStore>, pipeline: ContentPipeline) -> Self {
        Self {
            store,
            pipeline,
            progress: true,
        }
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Plans and runs one sweep. Only failures to read markets or clusters abort the cycle;
    /// everything else is reported per job in the summary.
    pub async fn run_cycle(&self, opts: &CycleOptions) -> Result<CycleSummary, StoreError> {
        let mut summary = CycleSummary::default();
        let jobs = self.plan(opts, &mut summary).await?;
        summary.jobs_created = jobs.len();
        summary.planned = jobs
            .iter()
            .map(|j| PlannedJob {
                cluster_id: j.cluster_id.clone(),
                market_id: j.market_id.clone(),
                lang: j.lang.clone(),
                pivot_hash: j.pivot_hash.clone(),
            })
            .collect();
        info!(
            clusters = summary.clusters_scanned,
            jobs = summary.jobs_created,
            fresh = summary.skipped_fresh,
            no_pivot = summary.skipped_no_pivot,
            pivot_lang = summary.skipped_pivot_lang,
            authored = summary.skipped_authored,
            dry_run = opts.dry_run,
            "pretranslation planned"
        );
        if opts.dry_run || jobs.is_empty() {
            return Ok(summary);
        }

        let total = jobs.len();
        let done = AtomicUsize::new(0);
        let progress = Progress::new(self.progress);
        let mut outcomes: Vec<(PretranslationJob, Result<ClusterAiRecord, JobError>)> =
            stream::iter(jobs.into_iter().map(|job| {
                let done = &done;
                let progress = &progress;
                async move {
                    let res = self.execute(&job, opts.per_item_timeout).await;
                    progress.progress("pretranslate", done.fetch_add(1, Ordering::SeqCst) + 1, total);
                    (job, res)
                }
            }))
            .buffer_unordered(opts.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|(a, _), (b, _)| (&a.cluster_id, &a.lang).cmp(&(&b.cluster_id, &b.lang)));

        for (job, res) in outcomes {
            match res {
                Ok(row) => {
                    summary.translations_inserted += 1;
                    debug!(cluster_id = %job.cluster_id, lang = %job.lang, record_id = row.id, "inserted");
                }
                Err(e) => {
                    warn!(
                        cluster_id = %job.cluster_id,
                        lang = %job.lang,
                        pivot_hash = %job.pivot_hash,
                        error = %e,
                        "pretranslation failed"
                    );
                    summary.fail(&job.cluster_id, &job.lang, e.kind(), e.to_string());
                }
            }
        }
        info!(
            inserted = summary.translations_inserted,
            failed = summary.failures.len(),
            "pretranslation cycle finished"
        );
        Ok(summary)
    }

    async fn plan(
        &self,
        opts: &CycleOptions,
        summary: &mut CycleSummary,
    ) -> Result<Vec<PretranslationJob>, StoreError> {
        let since = Utc::now() - chrono::Duration::hours(opts.recent_hours.max(0));
        let markets = self.store.enabled_markets().await?;
        let clusters = self.store.clusters_updated_since(since).await?;
        summary.clusters_scanned = clusters.len();
        // Pivot rows are source content; no market may overwrite another market's pivot.
        let pivot_langs: Vec<String> = markets
            .iter()
            .map(|m| m.pivot_lang.trim().to_ascii_lowercase())
            .collect();

        let mut jobs = Vec::new();
        let mut claimed: HashSet<(String, String)> = HashSet::new();
        let mut no_pivot: HashSet<String> = HashSet::new();

        for cluster in &clusters {
            let mut pivots: HashMap<String, Option<ClusterAiRecord>> = HashMap::new();
            for market in &markets {
                let pivot_key = market.pivot_lang.trim().to_ascii_lowercase();
                if !pivots.contains_key(&pivot_key) {
                    match self.store.current_record(&cluster.id, &market.pivot_lang).await {
                        Ok(rec) => {
                            pivots.insert(pivot_key.clone(), rec);
                        }
                        Err(e) => {
                            summary.fail(&cluster.id, &market.pivot_lang, "persistence_error", e.to_string());
                            continue;
                        }
                    }
                }
                let Some(Some(pivot)) = pivots.get(&pivot_key) else {
                    no_pivot.insert(cluster.id.clone());
                    continue;
                };
                let hash = pivot_hash(&pivot.title, &pivot.summary, &pivot.details);
                self.plan_market(
                    cluster.id.as_str(),
                    market,
                    pivot,
                    &hash,
                    &pivot_langs,
                    &mut claimed,
                    &mut jobs,
                    summary,
                )
                .await;
            }
        }
        summary.skipped_no_pivot = no_pivot.len();
        Ok(jobs)
    }

    #[allow(clippy::too_many_arguments)]
    async fn plan_market(
        &self,
        cluster_id: &str,
        market: &Market,
        pivot: &ClusterAiRecord,
        hash: &str,
        pivot_langs: &[String],
        claimed: &mut HashSet<(String, String)>,
        jobs: &mut Vec<PretranslationJob>,
        summary: &mut CycleSummary,
    ) {
        for lang in &market.pretranslate_langs {
            let lang = lang.trim();
            if lang.is_empty() || same_language(lang, &market.pivot_lang) {
                continue;
            }
            if !claimed.insert((cluster_id.to_string(), lang.to_ascii_lowercase())) {
                continue;
            }
            if pivot_langs.iter().any(|p| p.eq_ignore_ascii_case(lang)) {
                debug!(cluster_id, lang, market = %market.id, "target is a market pivot, skipping");
                summary.skipped_pivot_lang += 1;
                continue;
            }
            let existing = match self.store.current_record(cluster_id, lang).await {
                Ok(rec) => rec,
                Err(e) => {
                    summary.fail(cluster_id, lang, "persistence_error", e.to_string());
                    continue;
                }
            };
            if is_fresh(existing.as_ref(), hash) {
                summary.skipped_fresh += 1;
                continue;
            }
            if existing
                .as_ref()
                .is_some_and(|r| r.is_current && !is_pretranslated(r))
            {
                debug!(cluster_id, lang, "current record is authored content, skipping");
                summary.skipped_authored += 1;
                continue;
            }
            jobs.push(PretranslationJob {
                cluster_id: cluster_id.to_string(),
                market_id: market.id.clone(),
                pivot_lang: market.pivot_lang.clone(),
                lang: lang.to_string(),
                pivot_hash: hash.to_string(),
                pivot: pivot.clone(),
            });
        }
    }

    /// Translation runs under the per-item timeout; the insert only happens once every field
    /// translated, so an abandoned job leaves the previous current row in place.
    async fn execute(
        &self,
        job: &PretranslationJob,
        per_item_timeout: Duration,
    ) -> Result<ClusterAiRecord, JobError> {
        let (title, summary, details) = timeout(per_item_timeout, self.translate_fields(job))
            .await
            .map_err(|_| JobError::Timeout(per_item_timeout))??;

        let row = self
            .store
            .insert_current_record(NewClusterAiRecord {
                cluster_id: job.cluster_id.clone(),
                lang: job.lang.clone(),
                title,
                summary,
                details,
                pivot_hash: Some(job.pivot_hash.clone()),
                provenance: Some(provenance_tag(&job.pivot_lang, &job.lang, &job.pivot_hash)),
            })
            .await?;
        info!(
            cluster_id = %job.cluster_id,
            lang = %job.lang,
            pivot_hash = %job.pivot_hash,
            "pretranslation inserted"
        );
        Ok(row)
    }

    async fn translate_fields(
        &self,
        job: &PretranslationJob,
    ) -> Result<(String, String, String), JobError> {
        let client = self.pipeline.client();
        let src = job.pivot_lang.as_str();
        let dst = job.lang.as_str();
        let title = client.translate_segment(&job.pivot.title, src, dst).await?;
        let summary = client.translate_segment(&job.pivot.summary, src, dst).await?;
        let details = self.pipeline.translate_fragment(&job.pivot.details, src, dst).await?;
        Ok((title, summary, details))
    }
}
