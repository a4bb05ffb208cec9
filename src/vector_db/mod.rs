// LanceDB is the default embedded vector database
pub mod lance_client;
pub use lance_client::LanceVectorStore;

// Qdrant is optional (requires external server)
#[cfg(feature = "qdrant-backend")]
pub mod qdrant_client;
#[cfg(feature = "qdrant-backend")]
pub use qdrant_client::QdrantVectorStore;

use crate::config::VectorDbConfig;
use crate::error::StorageError;
use crate::types::Metadata;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Exact-match conditions on top-level payload keys
pub type PayloadFilter = Metadata;

/// One similarity hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    /// Similarity in [0, 1], higher is closer
    pub score: f32,
    pub payload: Metadata,
}

/// A stored vector with its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Metadata,
}

/// Trait for vector database operations
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Open the connection and create the collection if needed. Idempotent.
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Insert or replace the vector stored under `id`
    async fn store(&self, id: &str, vector: Vec<f32>, payload: Metadata) -> Result<()>;

    /// Hits with `score >= threshold`, best first, at most `limit`
    async fn search(
        &self,
        query: Vec<f32>,
        limit: usize,
        threshold: f32,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<VectorHit>>;

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>>;

    /// Returns false if nothing was stored under `id`
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count(&self) -> Result<usize>;

    async fn health_check(&self) -> bool;
}

/// Map a raw similarity onto [0, 1]
pub(crate) fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// True when every filter key is present in `payload` with an equal value
pub(crate) fn payload_matches(payload: &Metadata, filter: Option<&PayloadFilter>) -> bool {
    filter.is_none_or(|f| f.iter().all(|(k, v)| payload.get(k) == Some(v)))
}

/// Sort best first, apply the threshold and the limit
pub(crate) fn finalize_hits(mut hits: Vec<VectorHit>, limit: usize, threshold: f32) -> Vec<VectorHit> {
    hits.retain(|h| h.score >= threshold);
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

/// Build and connect the vector store named by `config.backend`
pub async fn create_vector_store(
    config: &VectorDbConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend.as_str() {
        "lancedb" => {
            tracing::info!(
                "Using LanceDB vector backend at {}",
                config.lancedb_path.display()
            );
            Arc::new(LanceVectorStore::new(
                &config.lancedb_path.to_string_lossy(),
                &config.collection_name,
                dimension,
            ))
        }
        #[cfg(feature = "qdrant-backend")]
        "qdrant" => {
            tracing::info!("Using Qdrant vector backend at {}", config.qdrant_url);
            Arc::new(
                QdrantVectorStore::new(&config.qdrant_url, &config.collection_name, dimension)
                    .context("Failed to initialize Qdrant vector store")?,
            )
        }
        other => {
            return Err(StorageError::unavailable(
                other,
                "backend not compiled in or unknown",
            )
            .into());
        }
    };

    store
        .connect()
        .await
        .with_context(|| format!("Failed to connect {} vector store", store.backend_name()))?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, score: f32) -> VectorHit {
        VectorHit {
            id: id.to_string(),
            score,
            payload: Metadata::new(),
        }
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(1.3), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
        assert_eq!(clamp_score(f32::NAN), 0.0);
    }

    #[test]
    fn test_payload_matches() {
        let mut payload = Metadata::new();
        payload.insert("node_type".to_string(), json!("FUNCTION"));
        payload.insert("language".to_string(), json!("python"));

        let mut filter = PayloadFilter::new();
        assert!(payload_matches(&payload, None));
        assert!(payload_matches(&payload, Some(&filter)));

        filter.insert("node_type".to_string(), json!("FUNCTION"));
        assert!(payload_matches(&payload, Some(&filter)));

        filter.insert("language".to_string(), json!("rust"));
        assert!(!payload_matches(&payload, Some(&filter)));

        let mut missing = PayloadFilter::new();
        missing.insert("repo".to_string(), json!("x"));
        assert!(!payload_matches(&payload, Some(&missing)));
    }

    #[test]
    fn test_finalize_hits_orders_and_limits() {
        let hits = vec![hit("a", 0.4), hit("b", 0.9), hit("c", 0.7), hit("d", 0.6)];
        let out = finalize_hits(hits, 2, 0.5);
        let ids: Vec<&str> = out.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_create_vector_store_rejects_unknown_backend() {
        let config = VectorDbConfig {
            backend: "chroma".to_string(),
            ..Default::default()
        };
        let err = create_vector_store(&config, 8).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::BackendUnavailable { .. })
        ));
    }
}
