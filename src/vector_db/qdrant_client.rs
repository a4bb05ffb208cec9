use super::{
    PayloadFilter, VectorHit, VectorRecord, VectorStore, clamp_score, finalize_hits,
    payload_matches,
};
use crate::error::{EmbeddingError, StorageError};
use crate::types::Metadata;
use anyhow::{Context, Result};
use qdrant_client::qdrant::vectors_config::Config;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, GetPointsBuilder, PointId, PointStruct, PointsIdsList, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParams, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Payload keys pushed down as Qdrant conditions; everything else is post-filtered
const INDEXED_KEYS: [&str; 2] = ["node_type", "path"];

const OVERFETCH_FACTOR: usize = 4;

pub struct QdrantVectorStore {
    client: Qdrant,
    url: String,
    collection: String,
    dimension: usize,
}

impl QdrantVectorStore {
    /// Build a client; no request is made until `connect`
    pub fn new(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .context("Failed to create Qdrant client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            collection: collection.to_string(),
            dimension,
        })
    }

    /// Qdrant point ids must be integers or UUIDs; derive a UUID from the node id
    fn point_id(id: &str) -> String {
        let digest = Sha256::digest(id.as_bytes());
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    async fn collection_exists(&self) -> Result<bool> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| StorageError::unavailable("qdrant", e))?;

        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == self.collection))
    }

    /// Rebuild the caller's payload from the stored one
    fn decode_payload(payload: &HashMap<String, QdrantValue>) -> Result<(String, Metadata)> {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let id = text("node_id").context("Stored point has no node_id")?;
        let mut decoded: Metadata = match text("payload_json") {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            None => Metadata::new(),
        };
        if let Some(content) = text("content") {
            decoded.insert("content".to_string(), json!(content));
        }
        Ok((id, decoded))
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend_name(&self) -> &'static str {
        "qdrant"
    }

    async fn connect(&self) -> Result<()> {
        tracing::info!("Connecting to Qdrant at {}", self.url);
        if self.collection_exists().await? {
            tracing::info!("Collection '{}' already exists", self.collection);
            return Ok(());
        }

        tracing::info!(
            "Creating collection '{}' with dimension {}",
            self.collection,
            self.dimension
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: self.dimension as u64,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    })),
                }),
            )
            .await
            .context("Failed to create collection")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn store(&self, id: &str, vector: Vec<f32>, payload: Metadata) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            }
            .into());
        }

        let mut rest = payload;
        let content = match rest.remove("content") {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => {
                rest.insert("content".to_string(), other);
                None
            }
            None => None,
        };
        let stored: Payload = json!({
            "node_id": id,
            "node_type": rest.get("node_type"),
            "path": rest.get("path"),
            "content": content,
            "payload_json": serde_json::to_string(&rest)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        })
        .try_into()
        .map_err(|e| StorageError::Serialization(format!("{}", e)))?;

        self.client
            .upsert_points(
                UpsertPointsBuilder::new(
                    &self.collection,
                    vec![PointStruct::new(Self::point_id(id), vector, stored)],
                )
                .wait(true),
            )
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        tracing::debug!("Stored vector {}", id);
        Ok(())
    }

    async fn search(
        &self,
        query: Vec<f32>,
        limit: usize,
        threshold: f32,
        filter: Option<&PayloadFilter>,
    ) -> Result<Vec<VectorHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conditions: Vec<Condition> = filter
            .map(|f| {
                INDEXED_KEYS
                    .iter()
                    .filter_map(|key| {
                        f.get(*key)
                            .and_then(|v| v.as_str())
                            .map(|v| Condition::matches(*key, v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let postfilter = filter.is_some_and(|f| {
            f.iter()
                .any(|(k, v)| !INDEXED_KEYS.contains(&k.as_str()) || !v.is_string())
        });
        let fetch = if postfilter {
            limit * OVERFETCH_FACTOR
        } else {
            limit
        };

        let mut search = SearchPointsBuilder::new(&self.collection, query, fetch as u64)
            .score_threshold(threshold)
            .with_payload(true);
        if !conditions.is_empty() {
            search = search.filter(Filter::must(conditions));
        }

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let mut hits = Vec::new();
        for point in response.result {
            let (id, payload) = Self::decode_payload(&point.payload)?;
            if payload_matches(&payload, filter) {
                hits.push(VectorHit {
                    id,
                    score: clamp_score(point.score),
                    payload,
                });
            }
        }

        Ok(finalize_hits(hits, limit, threshold))
    }

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(
                    &self.collection,
                    vec![PointId::from(Self::point_id(id))],
                )
                .with_payload(true)
                .with_vectors(true),
            )
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let Some(point) = response.result.into_iter().next() else {
            return Ok(None);
        };
        let (node_id, payload) = Self::decode_payload(&point.payload)?;

        #[allow(deprecated)]
        let vector = point
            .vectors
            .and_then(|v| v.vectors_options)
            .and_then(|options| match options {
                qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v) => Some(v.data),
                _ => None,
            })
            .unwrap_or_default();

        Ok(Some(VectorRecord {
            id: node_id,
            vector,
            payload,
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let existed = self.get(id).await?.is_some();
        if existed {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(PointsIdsList {
                            ids: vec![PointId::from(Self::point_id(id))],
                        })
                        .wait(true),
                )
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            tracing::debug!("Deleted vector {}", id);
        }
        Ok(existed)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_uuid_shaped_and_stable() {
        let a = QdrantVectorStore::point_id("node-1");
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
        assert_eq!(a, QdrantVectorStore::point_id("node-1"));
        assert_ne!(a, QdrantVectorStore::point_id("node-2"));
    }

    #[test]
    fn test_new_does_not_connect() {
        let store = QdrantVectorStore::new("http://localhost:6334", "repo_nodes", 384).unwrap();
        assert_eq!(store.backend_name(), "qdrant");
        assert_eq!(store.collection, "repo_nodes");
    }
}
