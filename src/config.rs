use anyhow::{Context, Result};
use std::{env, fs, path::Path};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const API_KEY_VAR: &str = "ATTEND_API_KEY";
const API_BASE_VAR: &str = "ATTEND_API_BASE";
const MODEL_VAR: &str = "ATTEND_MODEL";

/// Startup configuration, read once by the shell and handed to the core.
///
/// The system prompt is required: without it classification is meaningless,
/// so a missing prompt file fails initialization instead of degrading
/// silently. The API key may be absent at startup; analysis reports
/// `MissingApiKey` at request time so the shell can prompt for it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub system_prompt: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl AppConfig {
    pub fn load(prompt_path: &Path) -> Result<Self> {
        let system_prompt = fs::read_to_string(prompt_path).with_context(|| {
            format!(
                "failed to read classification system prompt from {}",
                prompt_path.display()
            )
        })?;

        let api_key = env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty());
        let api_base = env::var(API_BASE_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = env::var(MODEL_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            system_prompt,
            api_base,
            api_key,
            model,
        })
    }
}
