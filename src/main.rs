use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use news_lingo::html::sanitize_to_string;
use news_lingo::logging::init_logging;
use news_lingo::pipeline::{init_default_config, ArticleRequest, ConfigOverrides, PipelineConfig};
use news_lingo::pretranslate::Pretranslator;
use news_lingo::store::{MemoryStore, RenderKind};
use news_lingo::translate::TranslationCache;

#[derive(Parser, Debug)]
#[command(name = "news-lingo")]
#[command(about = "Sanitize news article HTML and translate it into many languages", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Config file path (default: $NEWS_LINGO_CONFIG, then search for news-lingo.toml upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model name sent to the provider
    #[arg(long, global = true)]
    model: Option<String>,

    /// Chat-completions endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Write prompts and raw responses per segment into DIR
    #[arg(long, global = true, value_name = "DIR")]
    trace_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sanitize an HTML file and print the cleaned HTML (no provider calls)
    Sanitize {
        #[arg(value_name = "HTML")]
        input: PathBuf,

        /// Write cleaned HTML here instead of stdout
        #[arg(short, long, value_name = "HTML")]
        output: Option<PathBuf>,
    },

    /// Sanitize and translate an HTML file into each target language
    Process {
        #[arg(value_name = "HTML")]
        input: PathBuf,

        /// Source language of the article
        #[arg(long)]
        source_lang: String,

        /// Target languages, comma separated (e.g. de,fr,ar)
        #[arg(long, value_delimiter = ',', required = true)]
        target_langs: Vec<String>,

        /// Directory for `<stem>.cleaned.html` and `<stem>.<lang>.html` (default: next to input)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Persist cleaned + translated records into this JSON snapshot
        #[arg(long, value_name = "JSON")]
        store: Option<PathBuf>,

        /// Article id used when persisting (default: input file stem)
        #[arg(long)]
        article_id: Option<String>,

        #[arg(long)]
        chunk_soft_chars: Option<usize>,

        #[arg(long)]
        chunk_hard_chars: Option<usize>,

        #[arg(long)]
        language_concurrency: Option<usize>,
    },

    /// Run one pretranslation cycle against a JSON snapshot store
    Pretranslate {
        #[arg(long, value_name = "JSON")]
        store: PathBuf,

        /// Only consider clusters updated within this many hours
        #[arg(long)]
        recent_hours: Option<i64>,

        /// Jobs in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long)]
        per_item_timeout_ms: Option<u64>,

        /// Plan jobs and print them without calling the provider
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
struct ProcessOutput<'a> {
    #[serde(flatten)]
    report: &'a news_lingo::pipeline::ArticleReport,
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let Some(command) = args.command else {
        let mut cmd = Args::command();
        cmd.print_help().context("print help")?;
        eprintln!(
            "\n\nTIPS:\n  - news-lingo --init-config writes news-lingo.toml and prompts/translate.txt.\n  - The API key is read from the env var named by provider.api_key_env (OPENAI_API_KEY).\n"
        );
        return Ok(());
    };

    let mut overrides = ConfigOverrides {
        config_path: args.config,
        model: args.model,
        endpoint: args.endpoint,
        trace_dir: args.trace_dir,
        ..ConfigOverrides::default()
    };
    match &command {
        Command::Process {
            chunk_soft_chars,
            chunk_hard_chars,
            language_concurrency,
            ..
        } => {
            overrides.chunk_soft_chars = *chunk_soft_chars;
            overrides.chunk_hard_chars = *chunk_hard_chars;
            overrides.language_concurrency = *language_concurrency;
        }
        Command::Pretranslate {
            recent_hours,
            concurrency,
            per_item_timeout_ms,
            ..
        } => {
            overrides.recent_hours = *recent_hours;
            overrides.concurrency = *concurrency;
            overrides.per_item_timeout_ms = *per_item_timeout_ms;
        }
        Command::Sanitize { .. } => {}
    }

    let workdir = std::env::current_dir().context("current dir")?;
    let cfg = PipelineConfig::resolve(&workdir, overrides).context("build config")?;
    init_logging(&cfg.logging).context("init logging")?;
    info!(config = %cfg.config_path.display(), model = %cfg.provider.model, "config resolved");

    match command {
        Command::Sanitize { input, output } => run_sanitize(&input, output.as_deref()),
        Command::Process {
            input,
            source_lang,
            target_langs,
            out_dir,
            store,
            article_id,
            ..
        } => {
            run_process(
                &cfg,
                &input,
                &source_lang,
                &target_langs,
                out_dir,
                store.as_deref(),
                article_id,
            )
            .await
        }
        Command::Pretranslate { store, dry_run, .. } => run_pretranslate(&cfg, &store, dry_run).await,
    }
}

fn run_sanitize(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("read input: {}", input.display()))?;
    let cleaned = sanitize_to_string(&raw);
    match output {
        Some(p) => std::fs::write(p, &cleaned)
            .with_context(|| format!("write output: {}", p.display()))?,
        None => println!("{cleaned}"),
    }
    Ok(())
}

async fn run_process(
    cfg: &PipelineConfig,
    input: &Path,
    source_lang: &str,
    target_langs: &[String],
    out_dir: Option<PathBuf>,
    store_path: Option<&Path>,
    article_id: Option<String>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("read input: {}", input.display()))?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("article")
        .to_string();
    let article_id = article_id.unwrap_or_else(|| stem.clone());

    let client = cfg.build_client(Arc::new(TranslationCache::new()))?;
    let pipeline = cfg.build_pipeline(client);

    let store = match store_path {
        Some(p) if p.exists() => MemoryStore::load(p)
            .with_context(|| format!("load store: {}", p.display()))?,
        _ => MemoryStore::new(),
    };
    let report = pipeline
        .process_and_persist_article(
            &store,
            ArticleRequest {
                article_id: &article_id,
                raw_html: &raw,
                source_lang,
                target_langs,
            },
        )
        .await;
    if let Some(p) = store_path {
        store
            .save(p)
            .with_context(|| format!("save store: {}", p.display()))?;
    }

    let out_dir = out_dir.unwrap_or_else(|| {
        input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("create out dir: {}", out_dir.display()))?;
    let mut files = Vec::new();
    let cleaned = store.rendered(&article_id, source_lang, RenderKind::Cleaned)?;
    if let Some(rec) = cleaned {
        let p = out_dir.join(format!("{stem}.cleaned.html"));
        std::fs::write(&p, rec.html).with_context(|| format!("write: {}", p.display()))?;
        files.push(p);
    }
    for result in report.results.iter().filter(|r| r.is_ok()) {
        let Some(html) = result.html.as_deref() else {
            continue;
        };
        let p = out_dir.join(format!("{stem}.{}.html", result.lang));
        std::fs::write(&p, html).with_context(|| format!("write: {}", p.display()))?;
        files.push(p);
    }

    let out = ProcessOutput {
        report: &report,
        files,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn run_pretranslate(cfg: &PipelineConfig, store_path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::load(store_path)
            .with_context(|| format!("load store: {}", store_path.display()))?,
    );
    let mut opts = cfg.cycle.clone();
    opts.dry_run = dry_run;

    let client = cfg.build_client(Arc::new(TranslationCache::new()))?;
    let pretranslator = Pretranslator::new(store.clone(), cfg.build_pipeline(client));
    let summary = pretranslator
        .run_cycle(&opts)
        .await
        .context("pretranslation cycle")?;
    if !dry_run {
        store
            .save(store_path)
            .with_context(|| format!("save store: {}", store_path.display()))?;
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
