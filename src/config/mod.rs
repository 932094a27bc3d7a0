
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::chunker::ChunkingConfig;
use crate::index::IndexConfig;

/// Environment variable holding the OpenAI API key. Credentials never live
/// in the config file.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub project: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Base URL of the Azure OpenAI instance.
    pub endpoint: String,
    pub api_version: String,
    pub embedding_deployment: String,
    pub chat_deployment: String,
    /// Number of chunk texts sent per embedding request.
    pub batch_size: usize,
    /// Expected dimensionality of the embedding vectors.
    pub embedding_dimension: usize,
}

impl Default for OpenAiConfig {
    #[inline]
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.azure.com".to_string(),
            api_version: "2023-07-01-preview".to_string(),
            embedding_deployment: "text-embedding-ada-002".to_string(),
            chat_deployment: "gpt-4-32k".to_string(),
            batch_size: 16,
            embedding_dimension: 1536,
        }
    }
}

/// Identity of the indexed project, used to parameterize the answer prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub repository_url: String,
    pub content_type: String,
    pub target_audience: String,
    /// Extra instructions appended to the system prompt.
    pub chat_prompt: Option<String>,
}

impl Default for ProjectConfig {
    #[inline]
    fn default() -> Self {
        Self {
            name: "this repository".to_string(),
            repository_url: String::new(),
            content_type: "code".to_string(),
            target_audience: "smart developer".to_string(),
            chat_prompt: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    #[error("API version cannot be empty")]
    EmptyApiVersion,
    #[error("Deployment name cannot be empty: {0}")]
    EmptyDeployment(&'static str),
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid chunk size: {0} (must be between 100 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than half the chunk size ({1})")]
    ChunkOverlapTooLarge(usize, usize),
    #[error("Invalid max connections: {0} (must be between 2 and 100)")]
    InvalidMaxConnections(usize),
    #[error("ef_construction ({0}) must be at least max_connections ({1})")]
    EfConstructionTooSmall(usize, usize),
    #[error("ef_search must be greater than zero")]
    InvalidEfSearch,
    #[error("Environment variable OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; an unreadable or invalid file is an error.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.validate().context("Default configuration is invalid")?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.validate_chunking()?;
        self.validate_index()?;
        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;

        if !(100..=100_000).contains(&chunking.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(chunking.chunk_size));
        }

        if chunking.chunk_overlap * 2 >= chunking.chunk_size {
            return Err(ConfigError::ChunkOverlapTooLarge(
                chunking.chunk_overlap,
                chunking.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_index(&self) -> Result<(), ConfigError> {
        let index = &self.index;

        if !(2..=100).contains(&index.max_connections) {
            return Err(ConfigError::InvalidMaxConnections(index.max_connections));
        }

        if index.ef_construction < index.max_connections {
            return Err(ConfigError::EfConstructionTooSmall(
                index.ef_construction,
                index.max_connections,
            ));
        }

        if index.ef_search == 0 {
            return Err(ConfigError::InvalidEfSearch);
        }

        Ok(())
    }
}

impl OpenAiConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        if self.api_version.trim().is_empty() {
            return Err(ConfigError::EmptyApiVersion);
        }

        if self.embedding_deployment.trim().is_empty() {
            return Err(ConfigError::EmptyDeployment("embedding_deployment"));
        }

        if self.chat_deployment.trim().is_empty() {
            return Err(ConfigError::EmptyDeployment("chat_deployment"));
        }

        if self.batch_size == 0 || self.batch_size > 2048 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        // A trailing slash matters for Url::join; normalize it here.
        let normalized = format!("{}/", self.endpoint.trim_end_matches('/'));
        Url::parse(&normalized).map_err(|_| ConfigError::InvalidEndpoint(self.endpoint.clone()))
    }

    /// Read the API key from the environment. The key is intentionally not
    /// part of the config file.
    #[inline]
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}
