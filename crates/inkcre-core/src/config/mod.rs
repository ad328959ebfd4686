//! User settings, persisted as TOML under the config directory

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// InKCre configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub organize: OrganizeConfig,
    pub search: SearchConfig,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeConfig {
    /// Upper bound for one extraction, content-understanding calls included
    pub timeout_secs: u64,
    /// Delay before a scheduled follow-up organize runs
    pub follow_up_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_steps: usize,
    pub k: usize,
    pub min_similarity: f32,
    pub traverse_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; `None` means `<data_dir>/inkcre/inkcre.db`
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.ppinfra.com/v3/openai".to_string(),
            chat_model: "deepseek/deepseek-v3-0324".to_string(),
            vision_model: "qwen/qwen2.5-vl-72b-instruct".to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "baai/bge-m3".to_string(),
            dimension: 1024,
        }
    }
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            follow_up_delay_secs: 0,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_steps: 16,
            k: 10,
            min_similarity: 0.5,
            traverse_depth: 2,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("INKCRE_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.map(|key| redact(&key)))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "llm.api_key is not allowed in the config file; export INKCRE_API_KEY instead"
            ));
        }
        Ok(())
    }
}

fn redact(key: &str) -> String {
    if key.chars().count() <= 4 {
        "***".to_string()
    } else {
        let suffix: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        format!("***{}", suffix)
    }
}

impl DatabaseSettings {
    /// Resolve the database file location
    pub fn resolved_path(&self) -> anyhow::Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .ok_or_else(|| anyhow!("Could not determine data directory"))?
                .join("inkcre")
                .join("inkcre.db")),
        }
    }
}

const KEYS: &[&str] = &[
    "llm.base_url",
    "llm.chat_model",
    "llm.vision_model",
    "llm.temperature",
    "llm.max_tokens",
    "llm.timeout_secs",
    "llm.api_key",
    "embedding.model",
    "embedding.dimension",
    "organize.timeout_secs",
    "organize.follow_up_delay_secs",
    "search.max_steps",
    "search.k",
    "search.min_similarity",
    "search.traverse_depth",
    "database.path",
    "database.max_connections",
];

impl Config {
    /// `$INKCRE_CONFIG_DIR`, else the platform config dir plus `inkcre`
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("INKCRE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("No platform config directory; set INKCRE_CONFIG_DIR"))?
                .join("inkcre")
        };
        Ok(dir)
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Cannot read {}", path.display()))?;
            if contents.lines().any(|line| line.trim_start().starts_with("api_key")) {
                return Err(anyhow!(
                    "Config file {} contains an api_key; use INKCRE_API_KEY instead",
                    path.display()
                ));
            }
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Write to the default location, validating first
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Cannot write {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;
        if self.embedding.dimension == 0 {
            return Err(anyhow!("embedding.dimension must be positive"));
        }
        if self.search.max_steps == 0 {
            return Err(anyhow!("search.max_steps must be positive"));
        }
        if !(-1.0..=1.0).contains(&self.search.min_similarity) {
            return Err(anyhow!("search.min_similarity must be between -1.0 and 1.0"));
        }
        Ok(())
    }

    /// Value of a dotted key, as it would be typed on the command line
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.chat_model" => Ok(self.llm.chat_model.clone()),
            "llm.vision_model" => Ok(self.llm.vision_model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            "embedding.model" => Ok(self.embedding.model.clone()),
            "embedding.dimension" => Ok(self.embedding.dimension.to_string()),

            "organize.timeout_secs" => Ok(self.organize.timeout_secs.to_string()),
            "organize.follow_up_delay_secs" => Ok(self.organize.follow_up_delay_secs.to_string()),

            "search.max_steps" => Ok(self.search.max_steps.to_string()),
            "search.k" => Ok(self.search.k.to_string()),
            "search.min_similarity" => Ok(self.search.min_similarity.to_string()),
            "search.traverse_depth" => Ok(self.search.traverse_depth.to_string()),

            "database.path" => Ok(self
                .database
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),

            // Only the last four characters are ever shown
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use INKCRE_API_KEY or OPENAI_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `inkcre config list` to see available keys.",
                key
            )),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.base_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("Base URL must start with http:// or https://"));
                }
                self.llm.base_url = value.trim_end_matches('/').to_string();
            }
            "llm.chat_model" => self.llm.chat_model = value.to_string(),
            "llm.vision_model" => self.llm.vision_model = value.to_string(),
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
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            "embedding.model" => self.embedding.model = value.to_string(),
            "embedding.dimension" => {
                let dimension: usize = value
                    .parse()
                    .with_context(|| format!("Invalid dimension value: {}", value))?;
                if dimension == 0 {
                    return Err(anyhow!("Embedding dimension must be positive"));
                }
                self.embedding.dimension = dimension;
            }

            "organize.timeout_secs" => {
                self.organize.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }
            "organize.follow_up_delay_secs" => {
                self.organize.follow_up_delay_secs = value
                    .parse()
                    .with_context(|| format!("Invalid follow_up_delay_secs value: {}", value))?;
            }

            "search.max_steps" => {
                let steps: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_steps value: {}", value))?;
                if steps == 0 {
                    return Err(anyhow!("max_steps must be at least 1"));
                }
                self.search.max_steps = steps;
            }
            "search.k" => {
                self.search.k = value
                    .parse()
                    .with_context(|| format!("Invalid k value: {}", value))?;
            }
            "search.min_similarity" => {
                let min: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid min_similarity value: {}", value))?;
                if !(-1.0..=1.0).contains(&min) {
                    return Err(anyhow!("min_similarity must be between -1.0 and 1.0"));
                }
                self.search.min_similarity = min;
            }
            "search.traverse_depth" => {
                self.search.traverse_depth = value
                    .parse()
                    .with_context(|| format!("Invalid traverse_depth value: {}", value))?;
            }

            "database.path" => self.database.path = Some(PathBuf::from(value)),
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be at least 1"));
                }
                self.database.max_connections = max;
            }

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "The API key is read from INKCRE_API_KEY or OPENAI_API_KEY, never from the config file"
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `inkcre config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// Every known key with its current value
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Delete the config file so the defaults apply again
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Cannot remove {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.chat_model, "deepseek/deepseek-v3-0324");
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.search.max_steps, 16);
        assert_eq!(config.search.k, 10);
        assert_eq!(config.search.traverse_depth, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get_roundtrip() {
        let mut config = Config::default();
        config.set("search.k", "3").unwrap();
        config.set("llm.base_url", "http://localhost:8080/v1/").unwrap();
        assert_eq!(config.get("search.k").unwrap(), "3");
        assert_eq!(config.get("llm.base_url").unwrap(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("llm.temperature", "3.5").is_err());
        assert!(config.set("search.max_steps", "0").is_err());
        assert!(config.set("search.min_similarity", "1.5").is_err());
        assert!(config.set("llm.base_url", "ftp://nope").is_err());
        assert!(config.set("no.such.key", "1").is_err());
    }

    #[test]
    fn test_api_key_cannot_be_set() {
        let mut config = Config::default();
        let err = config.set("llm.api_key", "sk-123").unwrap_err();
        assert!(err.to_string().contains("INKCRE_API_KEY"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("search.max_steps", "4").unwrap();
        config.set("embedding.model", "test-embed").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.search.max_steps, 4);
        assert_eq!(loaded.embedding.model, "test-embed");
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.search.k, 10);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[search]\nk = 5\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.search.k, 5);
        assert_eq!(loaded.search.max_steps, 16);
        assert_eq!(loaded.llm.vision_model, "qwen/qwen2.5-vl-72b-instruct");
    }

    #[test]
    fn test_api_key_in_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[llm]\napi_key = \"sk-secret\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let listed = config.list().unwrap();
        assert_eq!(listed.len(), KEYS.len());
        assert!(listed.iter().any(|(k, _)| k == "search.traverse_depth"));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact("sk-abcdef1234"), "***1234");
    }
}
