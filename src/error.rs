/// Centralized error types for repo-graph using thiserror
///
/// Each layer (embedder, stores, parsers, indexing) has its own enum; `KgError`
/// wraps them for callers that want a single type to match on.
use thiserror::Error;

/// Main error type for the knowledge graph
#[derive(Error, Debug)]
pub enum KgError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding model is unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),

    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),

    #[error("Embedding generation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model lock was poisoned: {0}")]
    LockPoisoned(String),
}

/// Errors raised by graph and vector store backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Backend '{0}' is not connected")]
    NotConnected(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to (de)serialize stored record: {0}")]
    Serialization(String),
}

/// Errors related to repository indexing and the job queue
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Index job not found: {0}")]
    JobNotFound(String),

    #[error("Failed to walk directory: {0}")]
    WalkFailed(String),

    #[error("Failed to read file '{file}': {reason}")]
    FileReadFailed { file: String, reason: String },

    #[error("File size exceeds maximum: {size} > {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Parsing '{file}' timed out after {secs} seconds")]
    ParseTimeout { file: String, secs: u64 },
}

/// Per-file parse failures; recorded in a `ParseResult`, never propagated
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("Unterminated code fence opened at line {0}")]
    UnterminatedFence(usize),

    #[error("Invalid YAML: {0}")]
    InvalidYaml(String),

    #[error("Failed to load grammar for {0}")]
    Grammar(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors related to request validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown relation type: {0}")]
    UnknownRelationType(String),

    #[error("Unknown direction: {0}")]
    InvalidDirection(String),

    #[error("{field} must be {constraint}, got {actual}")]
    ConstraintViolation {
        field: String,
        constraint: String,
        actual: String,
    },

    #[error("Empty {0}")]
    Empty(String),
}

impl From<anyhow::Error> for KgError {
    fn from(err: anyhow::Error) -> Self {
        KgError::Other(format!("{:#}", err))
    }
}

impl StorageError {
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    pub fn unavailable(backend: &str, reason: impl std::fmt::Display) -> Self {
        StorageError::BackendUnavailable {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl KgError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        KgError::Other(msg.into())
    }

    /// Check if this is a missing node, edge or job
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KgError::Storage(StorageError::NotFound { .. })
                | KgError::Indexing(IndexingError::JobNotFound(_))
        )
    }

    /// Check if this is a user error (validation, not found) vs system error
    pub fn is_user_error(&self) -> bool {
        self.is_not_found()
            || matches!(
                self,
                KgError::Validation(_) | KgError::Config(ConfigError::InvalidValue { .. })
            )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KgError::Storage(StorageError::BackendUnavailable { .. })
                | KgError::Embedding(EmbeddingError::Timeout(_))
                | KgError::Io(_)
        )
    }
}

/// Lift an `anyhow::Error` carrying one of the typed errors back into `KgError`
pub fn classify(err: anyhow::Error) -> KgError {
    let err = match err.downcast::<StorageError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<EmbeddingError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ValidationError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<IndexingError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<std::io::Error>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    err.into()
}
