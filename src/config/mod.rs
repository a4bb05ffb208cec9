/// Configuration system for repo-graph
///
/// Supports loading from multiple sources with priority:
/// Environment variables > Config file > Defaults
use crate::error::{ConfigError, KgError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Graph store configuration
    #[serde(default)]
    pub graph_db: GraphDbConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector_db: VectorDbConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Indexing configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,
}

/// Graph store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDbConfig {
    /// Backend: "sqlite" (embedded) or "surrealdb" (networked)
    #[serde(default = "default_graph_backend")]
    pub backend: String,

    /// SQLite database file
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// SurrealDB endpoint, e.g. "ws://localhost:8000"
    #[serde(default = "default_surreal_url")]
    pub surreal_url: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDbConfig {
    /// Backend: "lancedb" (embedded) or "qdrant" (networked)
    #[serde(default = "default_vector_backend")]
    pub backend: String,

    /// LanceDB data directory path
    #[serde(default = "default_lancedb_path")]
    pub lancedb_path: PathBuf,

    /// Qdrant server URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Collection (or table) name for node vectors
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2", "BAAI/bge-small-en-v1.5")
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Batch size for embedding generation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout in seconds for a single embedding call
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Files above this size (bytes) are skipped with a per-file error
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// FILE node content is truncated to this many characters
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Wall-clock bound for parsing one file
    #[serde(default = "default_parse_timeout")]
    pub parse_timeout_secs: u64,

    /// Files parsed ahead of the writer
    #[serde(default = "default_parse_concurrency")]
    pub parse_concurrency: usize,

    /// Extra glob patterns to skip, on top of the built-in ignore set
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// How often the idle worker re-checks the queue
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default minimum similarity score (0.0 to 1.0)
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Default result limit
    #[serde(default = "default_result_limit")]
    pub limit: usize,
}

fn default_graph_backend() -> String {
    #[cfg(feature = "surrealdb-backend")]
    return "surrealdb".to_string();
    #[cfg(not(feature = "surrealdb-backend"))]
    return "sqlite".to_string();
}

fn default_sqlite_path() -> PathBuf {
    crate::paths::PlatformPaths::default_sqlite_path()
}

fn default_surreal_url() -> String {
    "ws://localhost:8000".to_string()
}

fn default_namespace() -> String {
    "repo_graph".to_string()
}

fn default_database() -> String {
    "knowledge".to_string()
}

fn default_vector_backend() -> String {
    #[cfg(feature = "qdrant-backend")]
    return "qdrant".to_string();
    #[cfg(not(feature = "qdrant-backend"))]
    return "lancedb".to_string();
}

fn default_lancedb_path() -> PathBuf {
    crate::paths::PlatformPaths::default_lancedb_path()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection_name() -> String {
    "repo_nodes".to_string()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_max_file_size() -> u64 {
    1_048_576 // 1 MB
}

fn default_preview_chars() -> usize {
    1000
}

fn default_parse_timeout() -> u64 {
    10
}

fn default_parse_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_min_score() -> f32 {
    0.5
}

fn default_result_limit() -> usize {
    10
}

impl Default for GraphDbConfig {
    fn default() -> Self {
        Self {
            backend: default_graph_backend(),
            sqlite_path: default_sqlite_path(),
            surreal_url: default_surreal_url(),
            namespace: default_namespace(),
            database: default_database(),
            username: None,
            password: None,
        }
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            lancedb_path: default_lancedb_path(),
            qdrant_url: default_qdrant_url(),
            collection_name: default_collection_name(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            preview_chars: default_preview_chars(),
            parse_timeout_secs: default_parse_timeout(),
            parse_concurrency: default_parse_concurrency(),
            exclude_patterns: Vec::new(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            limit: default_result_limit(),
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> KgError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, KgError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, KgError> {
        let config_path = crate::paths::PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), KgError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), KgError> {
        if !matches!(self.graph_db.backend.as_str(), "sqlite" | "surrealdb") {
            return Err(invalid(
                "graph_db.backend",
                format!(
                    "must be 'sqlite' or 'surrealdb', got '{}'",
                    self.graph_db.backend
                ),
            ));
        }

        if !matches!(self.vector_db.backend.as_str(), "lancedb" | "qdrant") {
            return Err(invalid(
                "vector_db.backend",
                format!(
                    "must be 'lancedb' or 'qdrant', got '{}'",
                    self.vector_db.backend
                ),
            ));
        }

        if self.vector_db.collection_name.trim().is_empty() {
            return Err(invalid("vector_db.collection_name", "must not be empty"));
        }

        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size", "must be greater than 0"));
        }

        if self.embedding.timeout_secs == 0 {
            return Err(invalid("embedding.timeout_secs", "must be greater than 0"));
        }

        if self.indexing.max_file_size == 0 {
            return Err(invalid("indexing.max_file_size", "must be greater than 0"));
        }

        if self.indexing.preview_chars == 0 {
            return Err(invalid("indexing.preview_chars", "must be greater than 0"));
        }

        if self.indexing.parse_timeout_secs == 0 {
            return Err(invalid(
                "indexing.parse_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.indexing.parse_concurrency == 0 {
            return Err(invalid(
                "indexing.parse_concurrency",
                "must be greater than 0",
            ));
        }

        for pattern in &self.indexing.exclude_patterns {
            if let Err(e) = globset::Glob::new(pattern) {
                return Err(invalid(
                    "indexing.exclude_patterns",
                    format!("invalid glob '{}': {}", pattern, e),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.search.min_score) {
            return Err(invalid(
                "search.min_score",
                format!("must be between 0.0 and 1.0, got {}", self.search.min_score),
            ));
        }

        if self.search.limit == 0 {
            return Err(invalid("search.limit", "must be greater than 0"));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("REPO_GRAPH_GRAPH_BACKEND") {
            self.graph_db.backend = backend;
        }

        if let Ok(path) = std::env::var("REPO_GRAPH_SQLITE_PATH") {
            self.graph_db.sqlite_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("REPO_GRAPH_SURREAL_URL") {
            self.graph_db.surreal_url = url;
        }

        if let Ok(backend) = std::env::var("REPO_GRAPH_VECTOR_BACKEND") {
            self.vector_db.backend = backend;
        }

        if let Ok(path) = std::env::var("REPO_GRAPH_LANCEDB_PATH") {
            self.vector_db.lancedb_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("REPO_GRAPH_QDRANT_URL") {
            self.vector_db.qdrant_url = url;
        }

        if let Ok(model) = std::env::var("REPO_GRAPH_MODEL") {
            self.embedding.model_name = model;
        }

        if let Ok(min_score) = std::env::var("REPO_GRAPH_MIN_SCORE")
            && let Ok(score) = min_score.parse()
        {
            self.search.min_score = score;
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, KgError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
