use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::util::clean_api_key;

/// Models offered by `list`. The first entry is the non-interactive fallback
/// used by the original scripts; the default model is the second one.
pub const AVAILABLE_MODELS: &[&str] = &[
    "gpt-5-nano-2025-08-07",
    "gpt-5-mini-2025-08-07",
    "gpt-5-2025-08-07",
    "gemini-flash-latest",
    "gemini-2.5-pro",
    "mistral-reasoning-latest",
    "llama-reasoning-latest",
];

pub const DEFAULT_MODEL: &str = "gpt-5-mini-2025-08-07";
pub const DEFAULT_PERSONA_SET: &str = "persona-v3-limited-agents";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "openai-compatible")]
    OpenAICompatible,
}

impl Provider {
    /// Route a model id to its provider: GPT models go to OpenAI, Gemini
    /// models to Google, everything else through OpenRouter.
    pub fn from_model(model: &str) -> Self {
        let name = model.to_lowercase();
        if name.starts_with("gpt-") {
            Provider::OpenAI
        } else if name.contains("gemini") {
            Provider::Gemini
        } else {
            Provider::OpenRouter
        }
    }

    /// Environment variables searched for the API key, in priority order.
    pub fn api_key_aliases(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAI => &["OPENAI_API_KEY", "OPENAI_KEY", "API_KEY"],
            Provider::Gemini => &["GOOGLE_GEMINI_KEY", "GEMINI_API_KEY", "GEMINI_KEY"],
            Provider::OpenRouter => &[
                "ROUTER_API_KEY",
                "ROUTER_KEY",
                "ROUTER",
                "OPENROUTER_API_KEY",
            ],
            Provider::OpenAICompatible => &["OPENAI_API_KEY", "API_KEY"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
            Provider::OpenAICompatible => "openai-compatible",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "gemini" => Ok(Provider::Gemini),
            "openrouter" | "router" => Ok(Provider::OpenRouter),
            "openai-compatible" => Ok(Provider::OpenAICompatible),
            other => bail!("Unknown LLM provider: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    #[default]
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Low => "low",
            Verbosity::Medium => "medium",
            Verbosity::High => "high",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Inferred from the model id when absent
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Single env var holding the key; replaces the provider alias list
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    #[serde(default = "default_reasoning_summary")]
    pub reasoning_summary: String,
    #[serde(default)]
    pub verbosity: Verbosity,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_model(),
            api_key_env: None,
            base_url: None,
            reasoning_effort: ReasoningEffort::default(),
            reasoning_summary: default_reasoning_summary(),
            verbosity: Verbosity::default(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn resolved_provider(&self) -> Provider {
        self.provider
            .unwrap_or_else(|| Provider::from_model(&self.model))
    }

    /// Env vars to search for the API key, in order
    pub fn api_key_candidates(&self) -> Vec<String> {
        match &self.api_key_env {
            Some(var) => vec![var.clone()],
            None => self
                .resolved_provider()
                .api_key_aliases()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Look up and clean the API key. `api_key_env = "none"` disables the
    /// lookup, and openai-compatible gateways may run without a key.
    pub fn api_key(&self) -> Result<String> {
        if let Some(var) = &self.api_key_env {
            if var.eq_ignore_ascii_case("none") {
                return Ok(String::new());
            }
        }

        let candidates = self.api_key_candidates();
        for var in &candidates {
            if let Ok(value) = env::var(var) {
                let cleaned = clean_api_key(&value);
                if !cleaned.is_empty() {
                    debug!("Using API key from {}", var);
                    return Ok(cleaned);
                }
            }
        }

        let provider = self.resolved_provider();
        if provider == Provider::OpenAICompatible {
            return Ok(String::new());
        }

        bail!(
            "API key not found for provider '{}'. Set one of: {}",
            provider,
            candidates.join(", ")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_netlogo_dir")]
    pub netlogo_dir: PathBuf,
    #[serde(default = "default_persona_dir")]
    pub persona_dir: PathBuf,
    #[serde(default = "default_task_file")]
    pub task_file: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            netlogo_dir: default_netlogo_dir(),
            persona_dir: default_persona_dir(),
            task_file: default_task_file(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_persona_set")]
    pub persona_set: String,
    /// Upper bound on correction rounds after the initial audit
    #[serde(default = "default_max_corrections")]
    pub max_corrections: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            persona_set: default_persona_set(),
            max_corrections: default_max_corrections(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_reasoning_summary() -> String {
    "auto".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_netlogo_dir() -> PathBuf {
    PathBuf::from("experimentation/input/input-netlogo")
}

fn default_persona_dir() -> PathBuf {
    PathBuf::from("experimentation/input/input-persona")
}

fn default_task_file() -> PathBuf {
    PathBuf::from("input-task/single-agent-task")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_persona_set() -> String {
    DEFAULT_PERSONA_SET.to_string()
}

fn default_max_corrections() -> usize {
    1
}

impl Config {
    /// Load configuration from a specific path, or use default search paths.
    /// Environment overrides for the input directories are applied last.
    pub fn load_with_path(path: Option<String>) -> Result<Self> {
        let mut config = Self::load_unresolved(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_unresolved(path: Option<String>) -> Result<Self> {
        if let Some(config_path) = path {
            debug!("Loading config from explicit path: {}", config_path);
            return Self::load_from_path(&config_path)
                .with_context(|| format!("Failed to load config file {}", config_path));
        }

        if Path::new("lucim.toml").exists() {
            debug!("Loading config from ./lucim.toml");
            return Self::load_from_path("lucim.toml");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("netlogo-lucim").join("config.toml");
            if config_path.exists() {
                debug!("Loading config from {:?}", config_path);
                return Self::load_from_path(&config_path);
            }
        }

        debug!("Using default config");
        Ok(Self::default())
    }

    fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("INPUT_NETLOGO_DIR") {
            if !dir.trim().is_empty() {
                debug!("INPUT_NETLOGO_DIR override: {}", dir);
                self.paths.netlogo_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = env::var("INPUT_PERSONA_DIR") {
            if !dir.trim().is_empty() {
                debug!("INPUT_PERSONA_DIR override: {}", dir);
                self.paths.persona_dir = PathBuf::from(dir);
            }
        }
    }
}
