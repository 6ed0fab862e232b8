use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for an entire classification run.
///
/// Every section has defaults, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
    pub run: RunConfig,
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
}

/// Which embedding backend turns text into vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// Ollama `/api/embed` endpoint
    Ollama,
    /// Deterministic feature hashing, no model required
    Hash,
}

/// Configuration for the embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackendKind,
    pub model: String,
    pub base_url: String,
    /// Vector dimension. Fixed for the lifetime of a collection.
    pub dimension: usize,
    /// Maximum number of texts sent to the backend in one request
    pub batch_size: usize,
    /// Number of memoized embeddings kept in the LRU cache
    pub cache_capacity: usize,
    pub timeout_secs: u64,
    /// Retries after the first attempt on transient failures
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Ollama,
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 768,
            batch_size: 32,
            cache_capacity: 10_000,
            timeout_secs: 120,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Vector database storage mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// Embedded storage - persisted in-process under `path` (default)
    Embedded { path: String },
    /// Ephemeral storage - lost when the process ends
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Embedded {
            path: "./data/vectordb".to_string(),
        }
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_mode: StorageMode,
    /// Collection that is active when a run starts
    pub collection_name: String,
    /// Number of results returned from similarity searches when k is not given
    pub top_k: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::default(),
            collection_name: "specification_book_collection".to_string(),
            top_k: 3,
        }
    }
}

/// Corpus ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub specifications_dir: String,
    /// File extensions read from the specifications directory
    pub extensions: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Chunks embedded and inserted per batch
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            specifications_dir: "./data/specifications".to_string(),
            extensions: vec!["txt".to_string(), "md".to_string()],
            chunk_size: 1000,
            chunk_overlap: 100,
            batch_size: 32,
        }
    }
}

/// Capacities of the retrieval and classification caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub retrieval_capacity: usize,
    pub classification_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retrieval_capacity: 1024,
            classification_capacity: 1024,
        }
    }
}

/// Language model backend used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackendKind {
    Ollama,
    OpenAi,
    Anthropic,
}

/// Settings shared by every model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl BackendConfig {
    fn new(model: &str, base_url: &str) -> Self {
        Self {
            model: model.to_string(),
            base_url: base_url.to_string(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            api_key: None,
        }
    }
}

/// Configuration for the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackendKind,
    pub ollama: BackendConfig,
    pub openai: BackendConfig,
    pub anthropic: BackendConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackendKind::Ollama,
            ollama: BackendConfig::new("llama3.1:8b", "http://localhost:11434"),
            openai: BackendConfig::new("gpt-4o-mini", "https://api.openai.com"),
            anthropic: BackendConfig::new("claude-3-5-sonnet-20241022", "https://api.anthropic.com"),
        }
    }
}

impl LlmConfig {
    /// Settings of the selected backend.
    pub fn selected(&self) -> &BackendConfig {
        match self.backend {
            LlmBackendKind::Ollama => &self.ollama,
            LlmBackendKind::OpenAi => &self.openai,
            LlmBackendKind::Anthropic => &self.anthropic,
        }
    }
}

/// Descriptions supplied before a run starts and spliced into every prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub spec_book_description: String,
    pub item_description: String,
    /// Specification that tips near-tied classifications, if any
    pub weighted_spec: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: String,
    pub output_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: "./data/input".to_string(),
            output_dir: "./data/output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Joins retrieved chunk texts into one context string
    pub context_separator: String,
    /// Number of chunks sampled when verifying storage after ingestion
    pub verify_samples: usize,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_separator: "\n\n".to_string(),
            verify_samples: 5,
            show_progress: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Missing API keys are filled from `OPENAI_API_KEY` and `ANTHROPIC_API_KEY`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from `path` if it exists, otherwise use defaults.
    ///
    /// An existing file that fails to parse or validate is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.llm.openai.api_key.is_none() {
            self.llm.openai.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.llm.anthropic.api_key.is_none() {
            self.llm.anthropic.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        }
    }

    /// Rejects settings that can never produce a working run.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.embedding.dimension == 0, "embedding.dimension must be positive"),
            (self.embedding.batch_size == 0, "embedding.batch_size must be positive"),
            (self.embedding.cache_capacity == 0, "embedding.cache_capacity must be positive"),
            (self.ingest.batch_size == 0, "ingest.batch_size must be positive"),
            (self.ingest.chunk_size == 0, "ingest.chunk_size must be positive"),
            (
                self.ingest.chunk_overlap >= self.ingest.chunk_size,
                "ingest.chunk_overlap must be smaller than ingest.chunk_size",
            ),
            (self.cache.retrieval_capacity == 0, "cache.retrieval_capacity must be positive"),
            (
                self.cache.classification_capacity == 0,
                "cache.classification_capacity must be positive",
            ),
            (self.storage.top_k == 0, "storage.top_k must be positive"),
            (self.storage.collection_name.is_empty(), "storage.collection_name must not be empty"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid(message.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.collection_name, "specification_book_collection");
        assert_eq!(config.top_k, 3);
        assert!(matches!(config.storage_mode, StorageMode::Embedded { .. }));
    }

    #[test]
    fn test_llm_defaults_retry_three_times() {
        let config = LlmConfig::default();
        for backend in [&config.ollama, &config.openai, &config.anthropic] {
            assert_eq!(backend.max_retries, 3);
            assert_eq!(backend.retry_delay_ms, 1000);
        }
        assert_eq!(config.selected().model, config.ollama.model);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
embedding:
  backend: hash
  dimension: 64
storage:
  storage_mode:
    mode: memory
  collection_name: widgets
llm:
  backend: anthropic
  anthropic:
    model: claude-test
    base_url: http://localhost:9999
    max_retries: 1
run:
  spec_book_description: Building code
  item_description: Hardware items
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.embedding.backend, EmbeddingBackendKind::Hash);
        assert_eq!(config.embedding.dimension, 64);
        assert_eq!(config.embedding.batch_size, 32);
        assert!(matches!(config.storage.storage_mode, StorageMode::Memory));
        assert_eq!(config.storage.top_k, 3);
        assert_eq!(config.llm.backend, LlmBackendKind::Anthropic);
        assert_eq!(config.llm.selected().model, "claude-test");
        assert_eq!(config.llm.selected().max_retries, 1);
        assert_eq!(config.llm.selected().retry_delay_ms, 1000);
        assert_eq!(config.run.weighted_spec, None);
        assert_eq!(config.pipeline.context_separator, "\n\n");
    }

    #[test]
    fn test_validate_rejects_overlap_larger_than_chunk() {
        let mut config = Config::default();
        config.ingest.chunk_overlap = config.ingest.chunk_size;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let mut config = Config::default();
        config.embedding.dimension = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("embedding.dimension"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "storage:\n  top_k: 7\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.top_k, 7);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.yaml")).unwrap();
        assert_eq!(config.storage.top_k, 3);

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "storage:\n  top_k: 0\n").unwrap();
        assert!(Config::load_or_default(&bad).is_err());
    }
}
