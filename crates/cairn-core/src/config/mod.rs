//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Cairn configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub communities: CommunityConfig,
    #[serde(default)]
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: "anthropic/claude-3-5-haiku-latest".to_string(),
            fallback_models: vec!["openai/gpt-4o-mini".to_string()],
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "openai/text-embedding-3-small".to_string(),
        }
    }
}

/// Settings read by the community detection pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub enabled: bool,
    /// Tag of the clustering strategy (see `AlgorithmRegistry`)
    pub algorithm: String,
    /// Base resolution; higher values give smaller communities
    pub resolution: f64,
    pub max_cluster_size: usize,
    pub min_cluster_size: usize,
    /// Maximum number of levels, level 0 included
    pub hierarchical_levels: u32,
    pub auto_invalidate: bool,
    /// Applied to the running resolution for every level above 0
    pub level_resolution_factor: f64,
    /// Applied to the base resolution when re-clustering an oversized group
    pub split_resolution_factor: f64,
    /// Communities summarized concurrently within one level
    pub summary_concurrency: usize,
    #[serde(default)]
    pub global_query: GlobalQueryConfig,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: "louvain".to_string(),
            resolution: 1.0,
            max_cluster_size: 50,
            min_cluster_size: 3,
            hierarchical_levels: 3,
            auto_invalidate: true,
            level_resolution_factor: 0.8,
            split_resolution_factor: 1.5,
            summary_concurrency: 4,
            global_query: GlobalQueryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalQueryConfig {
    pub enabled: bool,
    pub signal_words: Vec<String>,
}

impl Default for GlobalQueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            signal_words: [
                "overall",
                "themes",
                "main topics",
                "summarize",
                "summary of",
                "across",
                "everything",
                "big picture",
                "patterns",
                "in general",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Overrides the default database location when set
    pub path: Option<PathBuf>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: None }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("CAIRN_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl CommunityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_cluster_size == 0 {
            return Err(anyhow!("communities.min_cluster_size must be at least 1"));
        }
        if self.max_cluster_size < self.min_cluster_size {
            return Err(anyhow!(
                "communities.max_cluster_size ({}) must not be below communities.min_cluster_size ({})",
                self.max_cluster_size,
                self.min_cluster_size
            ));
        }
        if !(self.resolution > 0.0) {
            return Err(anyhow!("communities.resolution must be positive"));
        }
        if self.hierarchical_levels == 0 {
            return Err(anyhow!("communities.hierarchical_levels must be at least 1"));
        }
        if !(self.level_resolution_factor > 0.0) || !(self.split_resolution_factor > 0.0) {
            return Err(anyhow!("communities resolution factors must be positive"));
        }
        if self.summary_concurrency == 0 {
            return Err(anyhow!("communities.summary_concurrency must be at least 1"));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("CAIRN_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("cairn")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;
        self.communities.validate()
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let c = &self.communities;
        match key {
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            "embedding.model" => Ok(self.embedding.model.clone()),

            "communities.enabled" => Ok(c.enabled.to_string()),
            "communities.algorithm" => Ok(c.algorithm.clone()),
            "communities.resolution" => Ok(c.resolution.to_string()),
            "communities.max_cluster_size" => Ok(c.max_cluster_size.to_string()),
            "communities.min_cluster_size" => Ok(c.min_cluster_size.to_string()),
            "communities.hierarchical_levels" => Ok(c.hierarchical_levels.to_string()),
            "communities.auto_invalidate" => Ok(c.auto_invalidate.to_string()),
            "communities.level_resolution_factor" => Ok(c.level_resolution_factor.to_string()),
            "communities.split_resolution_factor" => Ok(c.split_resolution_factor.to_string()),
            "communities.summary_concurrency" => Ok(c.summary_concurrency.to_string()),
            "communities.global_query.enabled" => Ok(c.global_query.enabled.to_string()),
            "communities.global_query.signal_words" => Ok(c.global_query.signal_words.join(", ")),

            "database.path" => Ok(self
                .database
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())),

            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use CAIRN_API_KEY or OPENROUTER_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `cairn config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.fallback_models" => {
                self.llm.fallback_models = split_list(value);
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = parse_value(key, value)?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = parse_value(key, value)?;
            }

            "embedding.model" => {
                self.embedding.model = value.to_string();
            }

            "communities.enabled" => self.communities.enabled = parse_value(key, value)?,
            "communities.algorithm" => self.communities.algorithm = value.to_string(),
            "communities.resolution" => self.communities.resolution = parse_value(key, value)?,
            "communities.max_cluster_size" => {
                self.communities.max_cluster_size = parse_value(key, value)?
            }
            "communities.min_cluster_size" => {
                self.communities.min_cluster_size = parse_value(key, value)?
            }
            "communities.hierarchical_levels" => {
                self.communities.hierarchical_levels = parse_value(key, value)?
            }
            "communities.auto_invalidate" => {
                self.communities.auto_invalidate = parse_value(key, value)?
            }
            "communities.level_resolution_factor" => {
                self.communities.level_resolution_factor = parse_value(key, value)?
            }
            "communities.split_resolution_factor" => {
                self.communities.split_resolution_factor = parse_value(key, value)?
            }
            "communities.summary_concurrency" => {
                self.communities.summary_concurrency = parse_value(key, value)?
            }
            "communities.global_query.enabled" => {
                self.communities.global_query.enabled = parse_value(key, value)?
            }
            "communities.global_query.signal_words" => {
                self.communities.global_query.signal_words = split_list(value)
                    .into_iter()
                    .map(|w| w.to_lowercase())
                    .collect();
            }

            "database.path" => {
                self.database.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the CAIRN_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `cairn config list` to see available keys.",
                    key
                ));
            }
        }
        self.communities.validate()
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.default_model",
            "llm.fallback_models",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "embedding.model",
            "communities.enabled",
            "communities.algorithm",
            "communities.resolution",
            "communities.max_cluster_size",
            "communities.min_cluster_size",
            "communities.hierarchical_levels",
            "communities.auto_invalidate",
            "communities.level_resolution_factor",
            "communities.split_resolution_factor",
            "communities.summary_concurrency",
            "communities.global_query.enabled",
            "communities.global_query.signal_words",
            "database.path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
