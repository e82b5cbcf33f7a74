use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::PromptsSection;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";
pub const DEFAULT_TRANSLATE: &str = "translate.txt";

/// Reads the translate prompt configured under `[prompts]`, relative to the config file.
/// Falls back to the built-in template when nothing is configured.
pub fn load_translate_prompt(config_path: &Path, p: &PromptsSection) -> anyhow::Result<String> {
    let Some(rel) = p.translate.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_TRANSLATE_TEXT.to_string());
    };
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut path = PathBuf::from(rel);
    if path.is_relative() {
        path = config_dir.join(&path);
    }
    if !path.exists() {
        return Err(anyhow!(
            "prompt file not found for translate: {} (run: news-lingo --init-config)",
            path.display()
        ));
    }
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("read prompt: {}", path.display()))?;
    Ok(text)
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![(DEFAULT_TRANSLATE, DEFAULT_TRANSLATE_TEXT)]
}

pub const TRANSLATE_SYSTEM_TEXT: &str =
    "You are a professional news translator. You translate faithfully and never add commentary.";

pub const DEFAULT_TRANSLATE_TEXT: &str = r#"Translate the news content below from {{source_lang}} to {{target_lang}}.

Rules:
- Translate all human-readable text. Do NOT omit content; do NOT summarize.
- Do NOT use ellipsis placeholders like … or ... to skip content.
- Keep ALL tokens like <<MT_...>> unchanged and in the same relative position.
- Preserve all digits (0-9) exactly.
- Reply with the translation wrapped in the same <<MT_SEG>> / <<MT_END>> marker lines as the input.
- Do NOT add any other text.

INPUT:
{{segment}}"#;
