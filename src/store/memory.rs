use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClusterAiRecord, ClusterRef, ClusterStore, Market, NewClusterAiRecord, RenderKind,
    RenderStore, RenderedRecord,
};
use crate::error::StoreError;

/// Serializable state of a [`MemoryStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub markets: Vec<Market>,
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
    #[serde(default)]
    pub records: Vec<ClusterAiRecord>,
    #[serde(default)]
    pub rendered: Vec<RenderedRecord>,
}

/// In-process store implementing both persistence traits, backed by a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&text)?;
        debug!(
            path = %path.display(),
            markets = snapshot.markets.len(),
            clusters = snapshot.clusters.len(),
            records = snapshot.records.len(),
            "loaded snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&self.snapshot()?)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Adds or replaces the market with the same id.
    pub fn upsert_market(&self, market: Market) -> Result<(), StoreError> {
        let mut s = self.lock()?;
        match s.markets.iter_mut().find(|m| m.id == market.id) {
            Some(m) => *m = market,
            None => s.markets.push(market),
        }
        Ok(())
    }

    pub fn touch_cluster(&self, id: &str, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut s = self.lock()?;
        match s.clusters.iter_mut().find(|c| c.id == id) {
            Some(c) => c.updated_at = updated_at,
            None => s.clusters.push(ClusterRef {
                id: id.to_string(),
                updated_at,
            }),
        }
        Ok(())
    }

    /// Every row for the pair, oldest first.
    pub fn history(&self, cluster_id: &str, lang: &str) -> Result<Vec<ClusterAiRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| r.cluster_id == cluster_id && r.lang.eq_ignore_ascii_case(lang))
            .cloned()
            .collect())
    }

    pub fn record_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.records.len())
    }

    pub fn rendered(
        &self,
        article_id: &str,
        lang: &str,
        kind: RenderKind,
    ) -> Result<Option<RenderedRecord>, StoreError> {
        Ok(self
            .lock()?
            .rendered
            .iter()
            .find(|r| r.article_id == article_id && r.lang == lang && r.kind == kind)
            .cloned())
    }

    fn upsert_rendered(
        &self,
        article_id: &str,
        lang: &str,
        kind: RenderKind,
        html: &str,
    ) -> Result<(), StoreError> {
        let mut s = self.lock()?;
        let now = Utc::now();
        match s
            .rendered
            .iter_mut()
            .find(|r| r.article_id == article_id && r.lang == lang && r.kind == kind)
        {
            Some(r) => {
                r.html = html.to_string();
                r.updated_at = now;
            }
            None => s.rendered.push(RenderedRecord {
                article_id: article_id.to_string(),
                lang: lang.to_string(),
                kind,
                html: html.to_string(),
                updated_at: now,
            }),
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn enabled_markets(&self) -> Result<Vec<Market>, StoreError> {
        Ok(self
            .lock()?
            .markets
            .iter()
            .filter(|m| m.enabled)
            .cloned()
            .collect())
    }

    async fn clusters_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClusterRef>, StoreError> {
        Ok(self
            .lock()?
            .clusters
            .iter()
            .filter(|c| c.updated_at >= since)
            .cloned()
            .collect())
    }

    async fn current_record(
        &self,
        cluster_id: &str,
        lang: &str,
    ) -> Result<Option<ClusterAiRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .iter()
            .rev()
            .find(|r| r.is_current && r.cluster_id == cluster_id && r.lang.eq_ignore_ascii_case(lang))
            .cloned())
    }

    async fn insert_current_record(
        &self,
        record: NewClusterAiRecord,
    ) -> Result<ClusterAiRecord, StoreError> {
        let mut s = self.lock()?;
        for r in s.records.iter_mut().filter(|r| {
            r.is_current && r.cluster_id == record.cluster_id && r.lang.eq_ignore_ascii_case(&record.lang)
        }) {
            r.is_current = false;
        }
        let id = s.records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let row = ClusterAiRecord {
            id,
            cluster_id: record.cluster_id,
            lang: record.lang,
            title: record.title,
            summary: record.summary,
            details: record.details,
            pivot_hash: record.pivot_hash,
            provenance: record.provenance,
            is_current: true,
            created_at: Utc::now(),
        };
        s.records.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl RenderStore for MemoryStore {
    async fn upsert_cleaned(
        &self,
        article_id: &str,
        lang: &str,
        html: &str,
    ) -> Result<(), StoreError> {
        self.upsert_rendered(article_id, lang, RenderKind::Cleaned, html)
    }

    async fn upsert_translation(
        &self,
        article_id: &str,
        lang: &str,
        html: &str,
    ) -> Result<(), StoreError> {
        self.upsert_rendered(article_id, lang, RenderKind::Translation, html)
    }
}
