//! TOML configuration parsing and validation.
//!
//! All runtime settings (data directory, generation backend, fetch limits,
//! prompt templates) live in one file and are passed explicitly into the
//! components that need them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_generation_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_generation_timeout() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    60
}
fn default_max_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    /// Template file; defaults to `<data_dir>/userprompt.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_summarize_id")]
    pub summarize_id: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            path: None,
            summarize_id: default_summarize_id(),
        }
    }
}

fn default_summarize_id() -> String {
    "summarize".to_string()
}

impl Config {
    /// Configuration used when no config file exists: `./data`, generation disabled.
    pub fn minimal() -> Self {
        Self::with_data_dir("./data")
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                data_dir: data_dir.into(),
            },
            generation: GenerationConfig::default(),
            fetch: FetchConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }

    pub fn prompts_path(&self) -> PathBuf {
        self.prompts
            .path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("userprompt.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.data_dir must not be empty");
        }

        match self.generation.provider.as_str() {
            "disabled" | "gemini" => {}
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled or gemini.",
                other
            ),
        }

        if self.generation.is_enabled() {
            if self.generation.model.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    self.generation.provider
                );
            }
            if self.generation.api_key_env.is_empty() {
                anyhow::bail!("generation.api_key_env must not be empty");
            }
        }

        if self.generation.timeout_secs == 0 {
            anyhow::bail!("generation.timeout_secs must be > 0");
        }
        if self.generation.channel_capacity == 0 {
            anyhow::bail!("generation.channel_capacity must be > 0");
        }
        if self.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be > 0");
        }
        if self.fetch.max_bytes == 0 {
            anyhow::bail!("fetch.max_bytes must be > 0");
        }
        if self.prompts.summarize_id.trim().is_empty() {
            anyhow::bail!("prompts.summarize_id must not be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
