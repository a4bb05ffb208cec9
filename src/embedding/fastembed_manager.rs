use super::Embedder;
use crate::error::EmbeddingError;
use anyhow::Result;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

/// FastEmbed-backed embedder.
///
/// The ONNX model is loaded by [`FastEmbedManager::open`] (or by the first embed call)
/// and kept for the life of the process. A load failure is remembered, so every later
/// call reports `ModelUnavailable` instead of retrying the download.
pub struct FastEmbedManager {
    model: EmbeddingModel,
    model_name: String,
    dimension: usize,
    handle: OnceLock<Result<Mutex<TextEmbedding>, String>>,
}

impl FastEmbedManager {
    /// Default model (all-MiniLM-L6-v2); nothing is loaded until `open`
    pub fn new() -> Self {
        Self::with_model(EmbeddingModel::AllMiniLML6V2, "all-MiniLM-L6-v2")
    }

    /// Resolve a configured model identifier
    pub fn from_model_name(name: &str) -> Result<Self, EmbeddingError> {
        let model = match name {
            "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                EmbeddingModel::AllMiniLML6V2
            }
            "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
                EmbeddingModel::AllMiniLML12V2
            }
            "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            other => return Err(EmbeddingError::UnknownModel(other.to_string())),
        };
        Ok(Self::with_model(model, name))
    }

    fn with_model(model: EmbeddingModel, name: &str) -> Self {
        let dimension = match model {
            EmbeddingModel::BGEBaseENV15 => 768,
            _ => 384,
        };
        Self {
            model,
            model_name: name.to_string(),
            dimension,
            handle: OnceLock::new(),
        }
    }

    /// Load the model once; later calls return the memoized outcome
    pub fn open(&self) -> Result<(), EmbeddingError> {
        self.loaded().map(|_| ())
    }

    fn loaded(&self) -> Result<&Mutex<TextEmbedding>, EmbeddingError> {
        let handle = self.handle.get_or_init(|| {
            tracing::info!("Initializing FastEmbed model: {:?}", self.model);
            let mut options = InitOptions::default();
            options.model_name = self.model.clone();
            options.show_download_progress = false;
            TextEmbedding::try_new(options)
                .map(Mutex::new)
                .map_err(|e| {
                    tracing::error!("Failed to load embedding model {}: {}", self.model_name, e);
                    e.to_string()
                })
        });
        handle
            .as_ref()
            .map_err(|reason| EmbeddingError::ModelUnavailable(reason.clone()))
    }
}

impl Default for FastEmbedManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for FastEmbedManager {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = self.loaded()?;
        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut guard = model
            .lock()
            .map_err(|e| EmbeddingError::LockPoisoned(e.to_string()))?;
        let embeddings = guard
            .embed(texts, None)
            .map_err(|e| EmbeddingError::GenerationFailed(e.to_string()))?;

        if let Some(bad) = embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            }
            .into());
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_name() {
        let err = FastEmbedManager::from_model_name("word2vec").err().unwrap();
        assert!(matches!(err, EmbeddingError::UnknownModel(_)));
    }

    #[test]
    fn test_dimension_known_without_loading() {
        let manager = FastEmbedManager::from_model_name("BAAI/bge-base-en-v1.5").unwrap();
        assert_eq!(manager.dimension(), 768);
        assert_eq!(manager.model_name(), "BAAI/bge-base-en-v1.5");
        assert!(manager.handle.get().is_none());
    }

    #[test]
    fn test_empty_batch_does_not_load_model() {
        let manager = FastEmbedManager::new();
        let embeddings = manager.embed_batch(vec![]).unwrap();
        assert!(embeddings.is_empty());
        assert!(manager.handle.get().is_none());
    }

    #[test]
    fn test_load_failure_is_memoized() {
        let manager = FastEmbedManager::new();
        assert!(manager.handle.set(Err("offline".to_string())).is_ok());

        for _ in 0..2 {
            let err = manager.embed("hello").unwrap_err();
            let err = err.downcast::<EmbeddingError>().unwrap();
            assert!(matches!(err, EmbeddingError::ModelUnavailable(ref m) if m == "offline"));
        }
        assert!(matches!(
            manager.open(),
            Err(EmbeddingError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_embedding_generation() {
        let manager = FastEmbedManager::new();
        manager.open().unwrap();
        let texts = vec![
            "def f(x): return x + 1".to_string(),
            "## Installation".to_string(),
        ];

        let embeddings = manager.embed_batch(texts).unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }

    #[test]
    fn test_embedding_is_deterministic_and_empty_is_defined() {
        let manager = FastEmbedManager::new();
        let a = manager.embed("graph expansion").unwrap();
        let b = manager.embed("graph expansion").unwrap();
        assert_eq!(a, b);

        let empty = manager.embed("").unwrap();
        assert_eq!(empty.len(), 384);
    }
}
