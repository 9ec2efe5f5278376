//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.order-insights.toml` files.

use anyhow::{Context, Result};
use order_insights::agent::GeminiConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".order-insights.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Language model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Order store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Cache lifetimes.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Conversation settings.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Tenant used when `--tenant` is not given.
    #[serde(default)]
    pub default_tenant: Option<String>,
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,

    /// Base URL of the Gemini API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the API key. The key itself is never
    /// stored in the file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_model() -> String {
    GeminiConfig::default().model
}

fn default_api_url() -> String {
    GeminiConfig::default().api_url
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    30
}

fn default_max_output_tokens() -> u32 {
    2048
}

/// Order store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Postgres connection string. Usually supplied via `DATABASE_URL`.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

/// Cache lifetimes in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_result_ttl")]
    pub result_ttl_seconds: i64,

    #[serde(default = "default_vocabulary_ttl")]
    pub vocabulary_ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            result_ttl_seconds: default_result_ttl(),
            vocabulary_ttl_seconds: default_vocabulary_ttl(),
        }
    }
}

fn default_result_ttl() -> i64 {
    order_insights::cache::RESULT_TTL_SECONDS
}

fn default_vocabulary_ttl() -> i64 {
    order_insights::agent::vocabulary::VOCABULARY_TTL_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Prior turns sent with each question.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_max_history_turns() -> usize {
    10
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.order-insights.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref api_url) = args.api_url {
            self.model.api_url = api_url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(ref database_url) = args.database_url {
            self.store.database_url = Some(database_url.clone());
        }
        if let Some(ref tenant) = args.tenant {
            self.general.default_tenant = Some(tenant.clone());
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Provider settings, reading the API key from the configured variable.
    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_url: self.model.api_url.clone(),
            model: self.model.name.clone(),
            api_key: std::env::var(&self.model.api_key_env).unwrap_or_default(),
            temperature: self.model.temperature,
            timeout_seconds: self.model.timeout_seconds,
            max_output_tokens: self.model.max_output_tokens,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
