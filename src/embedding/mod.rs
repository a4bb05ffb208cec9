mod fastembed_manager;

pub use fastembed_manager::FastEmbedManager;

use anyhow::Result;

/// Trait for embedding generation
///
/// Implementations are synchronous and CPU-bound; async callers run them on the
/// blocking pool.
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of text, one vector per input in order
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text. Empty text still yields a vector of `dimension()` floats.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(vec![text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedder returned no vector"))
    }

    /// Get the dimension of the embeddings
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}
