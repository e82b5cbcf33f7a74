pub mod chunker;
pub mod config;
pub mod error;
pub mod freezer;
pub mod html;
pub mod ir;
pub mod logging;
pub mod pipeline;
pub mod pretranslate;
pub mod progress;
pub mod provider;
pub mod quality;
pub mod sentinels;
pub mod store;
pub mod textutil;
pub mod translate;

pub use error::{JobError, ProviderError, StoreError, TranslateError};
pub use pipeline::{ArticleReport, ArticleRequest, ContentPipeline, LanguageResult, LanguageStatus, ProcessReport};
pub use pretranslate::{CycleOptions, CycleSummary, Pretranslator};
pub use translate::TranslationClient;
