//! Storage coordinator: one embedder, one graph store and one vector store
//! behind a single API.
//!
//! Every node is written to both stores under the same id. Queries start from
//! vector similarity and optionally widen the result set through the graph.

use crate::config::Config;
use crate::embedding::{Embedder, FastEmbedManager};
use crate::error::{EmbeddingError, StorageError};
use crate::graph_db::{GraphStore, create_graph_store};
use crate::types::{
    Direction, Edge, HealthReport, Metadata, Node, NodeType, QueryResult, RelatedNode,
    RelationType, TraceDirection,
};
use crate::vector_db::{VectorStore, create_vector_store};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Score multiplier applied to neighbors reached through one graph hop
pub const GRAPH_DECAY: f32 = 0.8;

/// Number of top vector hits whose neighbors are pulled in
pub const EXPANSION_FANOUT: usize = 5;

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

pub struct StorageCoordinator {
    embedder: Arc<dyn Embedder>,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embed_timeout: Duration,
}

impl StorageCoordinator {
    /// Wrap already connected stores
    pub fn new(
        embedder: Arc<dyn Embedder>,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            embedder,
            graph,
            vectors,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Load the configured model and connect both backends
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = Arc::new(
            FastEmbedManager::from_model_name(&config.embedding.model_name)
                .context("Failed to resolve embedding model")?,
        );
        let model = Arc::clone(&embedder);
        tokio::task::spawn_blocking(move || model.open())
            .await
            .context("Embedding model task panicked")?
            .context("Failed to load embedding model")?;

        let graph = create_graph_store(&config.graph_db).await?;
        let vectors = create_vector_store(&config.vector_db, embedder.dimension()).await?;

        Ok(Self::new(embedder, graph, vectors)
            .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs)))
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed on the blocking pool under the configured timeout
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let task = tokio::task::spawn_blocking(move || embedder.embed(&text));

        match tokio::time::timeout(self.embed_timeout, task).await {
            Ok(joined) => joined.context("Embedding task panicked")?,
            Err(_) => Err(EmbeddingError::Timeout(self.embed_timeout.as_secs()).into()),
        }
    }

    /// Embed `content` and write the node to both stores. Returns the node id.
    ///
    /// The id defaults to a digest of type and path, so storing the same entity
    /// again replaces it. Both writes are attempted even if one fails.
    pub async fn store_node(
        &self,
        content: &str,
        node_type: NodeType,
        path: &str,
        metadata: Metadata,
        id: Option<String>,
    ) -> Result<String> {
        let vector = self.embed(content).await?;

        let mut node = Node::new(node_type, path, content);
        if let Some(id) = id {
            node = node.with_id(id);
        }
        node.absorb_metadata(metadata.clone());

        let mut payload = metadata;
        payload.insert("node_type".to_string(), json!(node_type.as_str()));
        payload.insert("path".to_string(), json!(path));
        payload.insert("content".to_string(), json!(content));

        node.embedding = Some(vector.clone());
        let (graph_write, vector_write) = tokio::join!(
            self.graph.create_node(&node),
            self.vectors.store(&node.id, vector, payload),
        );
        graph_write.with_context(|| format!("Failed to write node {} to graph", node.id))?;
        vector_write.with_context(|| format!("Failed to write node {} to vectors", node.id))?;

        tracing::debug!("Stored {} node {} ({})", node_type, node.id, path);
        Ok(node.id)
    }

    /// Write a graph-only edge. Returns the edge id.
    pub async fn create_edge(
        &self,
        from_id: &str,
        to_id: &str,
        relation: RelationType,
        weight: f32,
        metadata: Metadata,
    ) -> Result<String> {
        let mut edge = Edge::new(from_id, to_id, relation).with_weight(weight);
        edge.metadata = metadata;
        self.graph.create_edge(&edge).await
    }

    /// Semantic search with optional one-hop graph expansion.
    ///
    /// Neighbors of the top [`EXPANSION_FANOUT`] hits that are not already results
    /// join with `parent_score * GRAPH_DECAY`. The type filter applies to both.
    pub async fn query(
        &self,
        text: &str,
        limit: usize,
        node_types: Option<&[NodeType]>,
        expand_graph: bool,
        threshold: f32,
    ) -> Result<Vec<QueryResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embed(text).await?;
        let fetch = if expand_graph { limit * 2 } else { limit };
        let hits = self
            .vectors
            .search(vector, fetch, threshold, None)
            .await
            .context("Vector search failed")?;

        let allowed = |node_type: NodeType| node_types.is_none_or(|types| types.contains(&node_type));

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(node) = self.graph.get_node(&hit.id).await? else {
                tracing::warn!("Vector {} has no graph node, skipping", hit.id);
                continue;
            };
            if !allowed(node.node_type) {
                continue;
            }
            results.push(QueryResult {
                node,
                score: hit.score,
                path_strength: None,
                expanded_via_graph: false,
            });
        }

        if expand_graph {
            let seeds: Vec<(String, f32)> = results
                .iter()
                .take(EXPANSION_FANOUT)
                .map(|r| (r.node.id.clone(), r.score))
                .collect();
            let mut positions: HashMap<String, usize> = results
                .iter()
                .enumerate()
                .map(|(i, r)| (r.node.id.clone(), i))
                .collect();

            for (seed_id, seed_score) in seeds {
                let strength = seed_score * GRAPH_DECAY;
                for neighbor in self.graph.get_neighbors(&seed_id, None, 1).await? {
                    if !allowed(neighbor.node_type) {
                        continue;
                    }
                    match positions.get(&neighbor.id) {
                        Some(&i) => {
                            let existing = &mut results[i];
                            if existing.expanded_via_graph && existing.score < strength {
                                existing.score = strength;
                                existing.path_strength = Some(strength);
                            }
                        }
                        None => {
                            positions.insert(neighbor.id.clone(), results.len());
                            results.push(QueryResult {
                                node: neighbor,
                                score: strength,
                                path_strength: Some(strength),
                                expanded_via_graph: true,
                            });
                        }
                    }
                }
            }
        }

        results.sort_by(|a, b| {
            b.strength()
                .partial_cmp(&a.strength())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Follow evolution edges from `node_id`.
    ///
    /// `Backward` walks `EVOLVES_FROM` edges (towards ancestors), `Forward` walks
    /// `EVOLVES_TO` edges (towards descendants) and `Both` walks either relation
    /// in either direction.
    pub async fn trace_evolution(
        &self,
        node_id: &str,
        direction: TraceDirection,
        max_depth: usize,
    ) -> Result<Vec<Node>> {
        let (relations, edge_direction): (&[RelationType], TraceDirection) = match direction {
            TraceDirection::Backward => (&[RelationType::EvolvesFrom], TraceDirection::Forward),
            TraceDirection::Forward => (&[RelationType::EvolvesTo], TraceDirection::Forward),
            TraceDirection::Both => (
                &[RelationType::EvolvesFrom, RelationType::EvolvesTo],
                TraceDirection::Both,
            ),
        };
        self.graph
            .trace_path(node_id, relations, edge_direction, max_depth)
            .await
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.graph.get_node(id).await
    }

    pub async fn get_edges(
        &self,
        node_id: &str,
        relations: Option<&[RelationType]>,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        self.graph.get_edges(node_id, relations, direction).await
    }

    /// Remove a node from both stores. Returns true if either store had it.
    pub async fn delete_node(&self, id: &str) -> Result<bool> {
        let (graph_delete, vector_delete) =
            tokio::join!(self.graph.delete_node(id), self.vectors.delete(id));
        let in_graph = graph_delete.context("Failed to delete node from graph")?;
        let in_vectors = vector_delete.context("Failed to delete node from vectors")?;
        Ok(in_graph || in_vectors)
    }

    /// Direct neighbors annotated with the connecting relationship and weight.
    /// Fails with a not-found error when `node_id` is not in the graph.
    pub async fn find_related(
        &self,
        node_id: &str,
        relation: Option<RelationType>,
        limit: usize,
    ) -> Result<Vec<RelatedNode>> {
        if self.graph.get_node(node_id).await?.is_none() {
            return Err(StorageError::not_found("node", node_id).into());
        }

        let filter = relation.map(|r| [r]);
        let edges = self
            .graph
            .get_edges(node_id, filter.as_ref().map(|f| f.as_slice()), Direction::Both)
            .await?;

        let mut related = Vec::new();
        for edge in edges.into_iter().take(limit) {
            if let Some(node) = self.graph.get_node(edge.other_end(node_id)).await? {
                related.push(RelatedNode {
                    node,
                    relationship: edge.relation,
                    weight: edge.weight,
                });
            }
        }
        Ok(related)
    }

    pub async fn health_check(&self) -> HealthReport {
        let (graph, vectors) = tokio::join!(self.graph.health_check(), self.vectors.health_check());
        HealthReport::new(graph, vectors)
    }

    pub async fn close(&self) -> Result<()> {
        self.graph.close().await?;
        self.vectors.close().await?;
        Ok(())
    }
}
