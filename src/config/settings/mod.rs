
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::http::MAX_RETRY_ATTEMPTS;
use crate::inference::prompt::Persona;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_COLLECTION: &str = "context";
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_S3_REGION: &str = "us-east-2";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub persona: Persona,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Only ever read from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_model: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("chat_model", &self.chat_model)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            chat_model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub collection: String,
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// Object-store URI, HTTP(S) URL or filesystem path of the corpus
    pub locator: Option<String>,
    pub s3_region: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            locator: None,
            s3_region: DEFAULT_S3_REGION.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid timeout: {0} (must be greater than 0 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid top-k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid chunk size: {0} (must be greater than 0 words)")]
    InvalidChunkSize(usize),
    #[error("Invalid ingestion concurrency: {0} (must be between 1 and 64)")]
    InvalidConcurrency(usize),
    #[error("Invalid collection name: {0:?} (letters, digits, '_', '-' and '.' only)")]
    InvalidCollection(String),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidOverride { key: String, value: String },
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default base directory, `$CONTEXT_QA_HOME` or `~/.context-qa`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os("CONTEXT_QA_HOME") {
            return Ok(PathBuf::from(home));
        }

        dirs::home_dir()
            .map(|home| home.join(".context-qa"))
            .or_else(|| dirs::data_dir().map(|data| data.join("context-qa")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir` (defaults when absent) and validate it.
    ///
    /// Environment overrides are not applied here, see [`Config::apply_overrides`].
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str::<Self>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from `config_dir`, then layer `.env` and process environment on top
    #[inline]
    pub fn load_with_env<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        // A missing .env file is the common case
        dotenvy::dotenv().ok();

        let mut config = Self::load(config_dir)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment-style overrides. `lookup` returns the value of a variable, if set.
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = base_url;
        }

        // A URL takes precedence over a plain path when both are present
        if let Some(locator) = lookup("CONTEXT_FILE_URL").or_else(|| lookup("CONTEXT_FILE_PATH")) {
            self.source.locator = Some(locator);
        }
        if let Some(region) = lookup("CONTEXT_QA_S3_REGION") {
            self.source.s3_region = region;
        }

        if let Some(collection) = lookup("CONTEXT_QA_COLLECTION") {
            self.index.collection = collection;
        }
        if let Some(top_k) = lookup("CONTEXT_QA_TOP_K") {
            self.index.top_k = parse_override("CONTEXT_QA_TOP_K", &top_k)?;
        }
        if let Some(chunk_size) = lookup("CONTEXT_QA_CHUNK_SIZE") {
            self.chunking.max_words = parse_override("CONTEXT_QA_CHUNK_SIZE", &chunk_size)?;
        }

        if let Some(name) = lookup("CONTEXT_QA_PERSONA_NAME") {
            self.persona.name = Some(name);
        }
        if let Some(contact) = lookup("CONTEXT_QA_PERSONA_CONTACT") {
            self.persona.contact = Some(contact);
        }

        self.validate()
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.index.validate()?;
        validate_chunking_config(&self.chunking)?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    /// The API key, or an error naming the variable that should carry it
    #[inline]
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.openai
            .api_key
            .as_deref()
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if !(1..=8192).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    /// Base URL with a trailing slash so that relative joins keep the path prefix
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        let trimmed = self.base_url.trim_end_matches('/');
        Url::parse(&format!("{}/", trimmed)).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_collection_name(&self.collection)?;

        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        Ok(())
    }
}

/// Collection names double as LanceDB table names
#[inline]
pub fn validate_collection_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidCollection(name.to_string()))
    }
}

fn validate_chunking_config(config: &ChunkingConfig) -> Result<(), ConfigError> {
    if config.max_words == 0 {
        return Err(ConfigError::InvalidChunkSize(config.max_words));
    }

    if !(1..=64).contains(&config.concurrency) {
        return Err(ConfigError::InvalidConcurrency(config.concurrency));
    }

    Ok(())
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        })
}
