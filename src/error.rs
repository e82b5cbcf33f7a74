//! Typed failures surfaced at the library boundary.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single completion call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider returned no content")]
    EmptyResponse,

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Failure translating one segment.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("translation integrity check failed: {0}")]
    Integrity(String),
}

/// Failure at the persistence boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of one pretranslation job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    /// Short machine-friendly reason used in cycle summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Translate(TranslateError::Provider(_)) => "provider_error",
            JobError::Translate(TranslateError::Integrity(_)) => "integrity_error",
            JobError::Store(_) => "persistence_error",
            JobError::Timeout(_) => "timeout",
        }
    }
}
