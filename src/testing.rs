//! Test doubles shared by unit tests

use crate::embedding::Embedder;
use crate::graph_db::{GraphStore, SqliteGraphStore};
use crate::storage::StorageCoordinator;
use crate::vector_db::{LanceVectorStore, VectorStore};
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub const TEST_DIMENSION: usize = 64;

/// Bag-of-tokens embedder: each lowercase word hashes to a signed bucket.
/// Texts sharing words are close; texts with no words in common are orthogonal
/// unless two words collide.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; TEST_DIMENSION];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = digest[0] as usize % TEST_DIMENSION;
            let sign = if digest[1] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            // empty text still gets a valid unit vector
            vector[TEST_DIMENSION - 1] = 1.0;
            return vector;
        }
        vector.iter().map(|v| v / norm).collect()
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn model_name(&self) -> &str {
        "test-hash"
    }
}

/// Coordinator over SQLite + LanceDB in `dir`, embedding with [`HashEmbedder`]
pub async fn coordinator(dir: &TempDir) -> StorageCoordinator {
    let graph = SqliteGraphStore::new(dir.path().join("graph.sqlite"));
    graph.connect().await.unwrap();

    let lance_path = dir.path().join("lancedb");
    let vectors = LanceVectorStore::new(&lance_path.to_string_lossy(), "repo_nodes", TEST_DIMENSION);
    vectors.connect().await.unwrap();

    let graph: Arc<dyn GraphStore> = Arc::new(graph);
    let vectors: Arc<dyn VectorStore> = Arc::new(vectors);
    StorageCoordinator::new(Arc::new(HashEmbedder::new()), graph, vectors)
}

#[test]
fn test_hash_embedder_is_deterministic_and_normalized() {
    let embedder = HashEmbedder::new();
    let a = embedder.embed("def f(x): return x").unwrap();
    let b = embedder.embed("def f(x): return x").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), TEST_DIMENSION);

    let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);

    let empty = embedder.embed("").unwrap();
    assert_eq!(empty.len(), TEST_DIMENSION);
    assert_eq!(embedder.calls(), 3);
}
