use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Location of the per-repository config file, relative to the work tree root.
pub const CONFIG_RELATIVE_PATH: &str = ".gitsmart/config.toml";

// ── Provider selection ────────────────────────────────────────────────────────

/// Which completion backend answers prompts.
///
/// | Provider     | Transport                                   | Key env var          |
/// |--------------|---------------------------------------------|----------------------|
/// | `ollama`     | local `/api/generate`                       | none                 |
/// | `openrouter` | OpenAI-compatible chat completions          | `OPENROUTER_API_KEY` |
/// | `openai`     | OpenAI-compatible chat completions          | `OPENAI_API_KEY`     |
/// | `deepseek`   | OpenAI-compatible chat completions          | `DEEPSEEK_API_KEY`   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    OpenRouter,
    OpenAi,
    DeepSeek,
}

impl ProviderKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }

    /// Environment variable carrying the API key, if the provider needs one.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub ollama_model: String,
    pub openrouter_model: String,
    pub openai_model: String,
    pub deepseek_model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    /// Upper bound on every provider call, in seconds.  A call that exceeds it
    /// is treated exactly like a provider failure.
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            deepseek_model: "deepseek-chat".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            timeout_secs: 30,
            temperature: 0.5,
            max_tokens: 800,
        }
    }
}

// ── Capture / significance ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Phrases whose presence in a commit message marks an architectural change.
    /// Matched case-insensitively on word boundaries.
    pub architectural_keywords: Vec<String>,
    /// Score at or above which a commit counts as significant (0.0 – 1.0).
    pub significance_threshold: f32,
    /// Distinct top-level components a commit must touch to earn the breadth signal.
    pub min_components: usize,
    /// Inserted + deleted lines at which the magnitude signal saturates.
    pub magnitude_lines: usize,
    /// Changed-file count that alone counts as a large commit.
    pub max_files: usize,
    /// Ask for a decision record from the post-commit hook.
    pub prompt_on_commit: bool,
    /// Record type used when `capture` is called without one.
    pub default_type: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            architectural_keywords: [
                "migrate",
                "migration",
                "refactor",
                "switch to",
                "switched to",
                "replace",
                "rewrite",
                "redesign",
                "architecture",
                "introduce",
                "deprecate",
                "adopt",
                "extract",
                "split",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            significance_threshold: 0.5,
            min_components: 3,
            magnitude_lines: 500,
            max_files: 20,
            prompt_on_commit: true,
            default_type: "decision".to_string(),
        }
    }
}

// ── Query ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// How many recent commits are considered as candidate facts.
    pub recent_commit_window: usize,
    /// Maximum records + commits handed to the provider.
    pub top_k: usize,
    /// Character budget for the rendered context block.
    pub max_context_chars: usize,
    /// Append answered queries to the local history log.
    pub record_history: bool,
    /// Entries kept in the local history log.
    pub history_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            recent_commit_window: 100,
            top_k: 8,
            max_context_chars: 6000,
            record_history: true,
            history_limit: 1000,
        }
    }
}

// ── Storage ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub notes_ref: String,
    /// Remote used by `sync` when none is given explicitly.
    pub remote: String,
    /// Attempts at a ref update before giving up on lock contention.
    pub lock_retries: u32,
    /// Base backoff between attempts; doubles each retry.
    pub lock_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            notes_ref: gitsmart_core::DEFAULT_NOTES_REF.to_string(),
            remote: "origin".to_string(),
            lock_retries: 3,
            lock_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub capture: CaptureConfig,
    pub query: QueryConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("GITSMART_PROVIDER") {
            match ProviderKind::from_label(&value) {
                Some(kind) => config.llm.provider = kind,
                None => bail!("GITSMART_PROVIDER names an unknown provider: '{value}'"),
            }
        }

        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.llm.ollama_base_url = value;
            }
        }

        Ok(config)
    }

    /// Load `.gitsmart/config.toml` under the given work tree root.
    pub fn load_for_repo(repo_root: impl AsRef<Path>) -> Result<Self> {
        Self::load_from(repo_root.as_ref().join(CONFIG_RELATIVE_PATH))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        match self.llm.provider {
            ProviderKind::Ollama => &self.llm.ollama_model,
            ProviderKind::OpenRouter => &self.llm.openrouter_model,
            ProviderKind::OpenAi => &self.llm.openai_model,
            ProviderKind::DeepSeek => &self.llm.deepseek_model,
        }
    }

    /// The active provider's API key from the environment.  Keys are never
    /// persisted in the config file.
    pub fn api_key(&self) -> Option<String> {
        let var = self.llm.provider.api_key_env()?;
        env::var(var).ok().filter(|key| !key.trim().is_empty())
    }

    pub fn api_key_configured(&self) -> bool {
        self.llm.provider.api_key_env().is_none() || self.api_key().is_some()
    }

    /// Read a value by dot path, e.g. `llm.provider`.
    pub fn get(&self, key: &str) -> Result<toml::Value> {
        let root = toml::Value::try_from(self)?;
        let mut cursor = &root;
        for segment in key.split('.') {
            cursor = cursor
                .get(segment)
                .ok_or_else(|| anyhow!("unknown config key: '{key}'"))?;
        }
        Ok(cursor.clone())
    }

    /// Write a value by dot path.  The value is parsed as a TOML literal
    /// (`0.7`, `true`, `["a", "b"]`) and falls back to a plain string.  The
    /// result must still deserialize into a valid config.
    pub fn set(&mut self, key: &str, raw_value: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self)?;
        let value = parse_literal(raw_value);

        let segments: Vec<&str> = key.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| anyhow!("empty config key"))?;

        let mut cursor = &mut root;
        for segment in parents {
            cursor = cursor
                .get_mut(*segment)
                .ok_or_else(|| anyhow!("unknown config key: '{key}'"))?;
        }
        let table = cursor
            .as_table_mut()
            .ok_or_else(|| anyhow!("'{key}' does not name a field"))?;
        if !table.contains_key(*last) {
            bail!("unknown config key: '{key}'");
        }
        table.insert((*last).to_string(), value);

        *self = root
            .try_into()
            .map_err(|err| anyhow!("invalid value for '{key}': {err}"))?;
        Ok(())
    }
}

fn parse_literal(raw: &str) -> toml::Value {
    let probe = format!("v = {raw}");
    match toml::from_str::<toml::Table>(&probe) {
        Ok(mut table) => table
            .remove("v")
            .unwrap_or_else(|| toml::Value::String(raw.to_string())),
        Err(_) => toml::Value::String(raw.to_string()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
