use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::chunker::{ChunkPolicy, DEFAULT_HARD_CHARS, DEFAULT_SOFT_CHARS};
use crate::config::{load_config, locate_config, AppConfig, CONFIG_FILENAME};
use crate::logging::LogConfig;
use crate::pipeline::prompts::{default_prompt_files, load_translate_prompt, DEFAULT_PROMPTS_DIR};
use crate::pipeline::trace::TraceWriter;
use crate::pipeline::ContentPipeline;
use crate::pretranslate::CycleOptions;
use crate::provider::openai::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::provider::{OpenAiProvider, OpenAiSettings};
use crate::translate::{Sampling, TranslationCache, TranslationClient};

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Command-line values that take precedence over the config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub chunk_soft_chars: Option<usize>,
    pub chunk_hard_chars: Option<usize>,
    pub language_concurrency: Option<usize>,
    pub trace_dir: Option<PathBuf>,
    pub recent_hours: Option<i64>,
    pub concurrency: Option<usize>,
    pub per_item_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout: Duration,
    pub sampling: Sampling,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub workdir: PathBuf,
    pub config_path: PathBuf,

    pub chunk_policy: ChunkPolicy,
    pub chunk_concurrency: usize,
    pub language_concurrency: usize,

    pub trace_dir: Option<PathBuf>,
    pub trace_prompts: bool,

    pub provider: ProviderConfig,
    pub translate_prompt: String,
    pub cycle: CycleOptions,
    pub logging: LogConfig,
}

impl PipelineConfig {
    /// Locates and loads the config file (if any) and merges `overrides` on top.
    pub fn resolve(workdir: &Path, overrides: ConfigOverrides) -> anyhow::Result<Self> {
        let workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());
        let cfg_file = locate_config(overrides.config_path.clone(), &workdir);

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if overrides.config_path.is_some() {
                return Err(anyhow!("config not found: {}", p.display()));
            }
        }
        let config_path = cfg_file.unwrap_or_else(|| workdir.join(CONFIG_FILENAME));
        Self::from_app_config(workdir, config_path, file_cfg, overrides)
    }

    pub fn from_app_config(
        workdir: PathBuf,
        config_path: PathBuf,
        file_cfg: AppConfig,
        overrides: ConfigOverrides,
    ) -> anyhow::Result<Self> {
        let pipe = &file_cfg.pipeline;
        let chunk_policy = ChunkPolicy::new(
            overrides
                .chunk_soft_chars
                .or(pipe.chunk_soft_chars)
                .unwrap_or(DEFAULT_SOFT_CHARS),
            overrides
                .chunk_hard_chars
                .or(pipe.chunk_hard_chars)
                .unwrap_or(DEFAULT_HARD_CHARS),
        );
        let chunk_concurrency = pipe.chunk_concurrency.unwrap_or(1).max(1);
        let language_concurrency = overrides
            .language_concurrency
            .or(pipe.language_concurrency)
            .unwrap_or(4)
            .max(1);

        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workdir.clone());
        let trace_dir = overrides
            .trace_dir
            .clone()
            .or_else(|| {
                pipe.trace_dir
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
            })
            .map(|p| if p.is_relative() { config_dir.join(p) } else { p });
        let trace_prompts = pipe.trace_prompts.unwrap_or(false) || overrides.trace_dir.is_some();

        let prov = &file_cfg.provider;
        let provider = ProviderConfig {
            endpoint: overrides
                .endpoint
                .clone()
                .or_else(|| prov.endpoint.clone())
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: overrides
                .model
                .clone()
                .or_else(|| prov.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key_env: prov
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            timeout: Duration::from_secs(prov.timeout_secs.unwrap_or(60).max(1)),
            sampling: Sampling {
                temperature: prov.temperature.unwrap_or(0.1),
                max_tokens: prov.max_tokens.unwrap_or(4096).max(1),
            },
        };

        let translate_prompt =
            load_translate_prompt(&config_path, &file_cfg.prompts).context("load prompts")?;

        let pre = &file_cfg.pretranslate;
        let cycle = CycleOptions {
            recent_hours: overrides.recent_hours.or(pre.recent_hours).unwrap_or(48),
            concurrency: overrides.concurrency.or(pre.concurrency).unwrap_or(4),
            per_item_timeout: Duration::from_millis(
                overrides
                    .per_item_timeout_ms
                    .or(pre.per_item_timeout_ms)
                    .unwrap_or(120_000),
            ),
            dry_run: false,
        };

        Ok(Self {
            workdir,
            config_path,
            chunk_policy,
            chunk_concurrency,
            language_concurrency,
            trace_dir,
            trace_prompts,
            provider,
            translate_prompt,
            cycle,
            logging: file_cfg.logging.clone(),
        })
    }

    pub fn trace_writer(&self) -> anyhow::Result<TraceWriter> {
        match (&self.trace_dir, self.trace_prompts) {
            (Some(dir), true) => TraceWriter::new(dir.clone(), true),
            _ => Ok(TraceWriter::disabled()),
        }
    }

    /// Reads the API key from the configured environment variable.
    pub fn build_provider(&self) -> anyhow::Result<OpenAiProvider> {
        let key = std::env::var(&self.provider.api_key_env).with_context(|| {
            format!("API key env var not set: {}", self.provider.api_key_env)
        })?;
        let provider = OpenAiProvider::new(OpenAiSettings {
            endpoint: self.provider.endpoint.clone(),
            model: self.provider.model.clone(),
            api_key: key,
            timeout: self.provider.timeout,
        })?;
        Ok(provider)
    }

    pub fn build_client(&self, cache: Arc<TranslationCache>) -> anyhow::Result<TranslationClient> {
        let provider = Arc::new(self.build_provider()?);
        Ok(TranslationClient::new(provider, cache)
            .with_prompt(self.translate_prompt.clone())
            .with_sampling(self.provider.sampling)
            .with_trace(self.trace_writer()?))
    }

    pub fn build_pipeline(&self, client: TranslationClient) -> ContentPipeline {
        ContentPipeline::new(client)
            .with_policy(self.chunk_policy)
            .with_concurrency(self.chunk_concurrency, self.language_concurrency)
    }
}

/// Writes `news-lingo.toml` and the default prompt files into `dir`.
///
/// Existing files are only replaced with `force`; an existing config without `force` is an error.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Err(anyhow!(
            "config already exists: {} (use --force to overwrite)",
            cfg_path.display()
        ));
    }

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;
    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
chunk_soft_chars = 3000
chunk_hard_chars = 12000
chunk_concurrency = 1
language_concurrency = 4
# trace_dir = "_trace"
trace_prompts = false

[provider]
endpoint = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o-mini"
# The key is read from this environment variable, never from the file.
api_key_env = "OPENAI_API_KEY"
timeout_secs = 60
temperature = 0.1
max_tokens = 4096

[prompts]
translate = "prompts/translate.txt"

[pretranslate]
recent_hours = 48
concurrency = 4
per_item_timeout_ms = 120000

[logging]
level = "info"
format = "text"
"#;
