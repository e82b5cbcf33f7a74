use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::logging::LogConfig;

pub const CONFIG_FILENAME: &str = "news-lingo.toml";
pub const CONFIG_ENV: &str = "NEWS_LINGO_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub pretranslate: PretranslateSection,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub chunk_soft_chars: Option<usize>,
    #[serde(default)]
    pub chunk_hard_chars: Option<usize>,
    /// Chunks of one language translated in parallel.
    #[serde(default)]
    pub chunk_concurrency: Option<usize>,
    /// Target languages of one article translated in parallel.
    #[serde(default)]
    pub language_concurrency: Option<usize>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProviderSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key; the key itself never lives in the file.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PretranslateSection {
    #[serde(default)]
    pub recent_hours: Option<i64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub per_item_timeout_ms: Option<u64>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

/// Looks for `filename` upwards from the working directory, then from `workdir`, then from
/// the executable's directory.
pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

/// Explicit path, then `NEWS_LINGO_CONFIG`, then the upward search.
pub fn locate_config(explicit: Option<PathBuf>, workdir: &Path) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, CONFIG_FILENAME))
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("toml");
        assert!(cfg.pipeline.chunk_soft_chars.is_none());
        assert!(cfg.provider.model.is_none());
        assert_eq!(cfg.logging.level, crate::logging::LogLevel::Info);
    }

    #[test]
    fn sections_parse() {
        let text = r#"
[pipeline]
chunk_soft_chars = 2000
trace_prompts = true

[provider]
model = "gpt-4o"
timeout_secs = 30

[pretranslate]
recent_hours = 24
concurrency = 8

[logging]
format = "json"
"#;
        let cfg: AppConfig = toml::from_str(text).expect("toml");
        assert_eq!(cfg.pipeline.chunk_soft_chars, Some(2000));
        assert_eq!(cfg.pipeline.trace_prompts, Some(true));
        assert_eq!(cfg.provider.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cfg.provider.timeout_secs, Some(30));
        assert_eq!(cfg.pretranslate.recent_hours, Some(24));
        assert_eq!(cfg.pretranslate.concurrency, Some(8));
        assert_eq!(cfg.logging.format, crate::logging::LogFormat::Json);
    }

    #[test]
    fn finds_config_in_parent_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(tmp.path().join(CONFIG_FILENAME), "").expect("write");
        let found = find_file_upwards(&nested, CONFIG_FILENAME, 8).expect("found");
        assert_eq!(found, tmp.path().join(CONFIG_FILENAME));
        assert!(find_file_upwards(&nested, CONFIG_FILENAME, 0).is_none());
    }
}
