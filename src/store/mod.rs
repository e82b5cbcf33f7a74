//! Persistence boundary: market configuration, cluster AI records and rendered output.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

mod memory;

pub use memory::{MemoryStore, Snapshot};

fn default_true() -> bool {
    true
}

/// A group of locales sharing a pivot language and a pretranslation target set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub pivot_lang: String,
    #[serde(default)]
    pub pretranslate_langs: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

/// One generated title/summary/details bundle for a (cluster, language) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAiRecord {
    pub id: u64,
    pub cluster_id: String,
    pub lang: String,
    pub title: String,
    pub summary: String,
    pub details: String,
    #[serde(default)]
    pub pivot_hash: Option<String>,
    #[serde(default)]
    pub provenance: Option<String>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewClusterAiRecord {
    pub cluster_id: String,
    pub lang: String,
    pub title: String,
    pub summary: String,
    pub details: String,
    pub pivot_hash: Option<String>,
    pub provenance: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    /// Sanitized source-language HTML.
    Cleaned,
    Translation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedRecord {
    pub article_id: String,
    pub lang: String,
    pub kind: RenderKind,
    pub html: String,
    pub updated_at: DateTime<Utc>,
}

/// Read market/cluster state and supersede cluster AI records.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Enabled markets in store order.
    async fn enabled_markets(&self) -> Result<Vec<Market>, StoreError>;

    async fn clusters_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClusterRef>, StoreError>;

    async fn current_record(
        &self,
        cluster_id: &str,
        lang: &str,
    ) -> Result<Option<ClusterAiRecord>, StoreError>;

    /// Inserts `record` as the current row for its (cluster, language) pair and demotes the
    /// previous current row in the same step.
    async fn insert_current_record(
        &self,
        record: NewClusterAiRecord,
    ) -> Result<ClusterAiRecord, StoreError>;
}

/// Upserts of rendered article HTML keyed by (article, language).
#[async_trait]
pub trait RenderStore: Send + Sync {
    async fn upsert_cleaned(&self, article_id: &str, lang: &str, html: &str)
        -> Result<(), StoreError>;

    async fn upsert_translation(
        &self,
        article_id: &str,
        lang: &str,
        html: &str,
    ) -> Result<(), StoreError>;
}
