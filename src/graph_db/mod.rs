//! Graph storage: nodes, typed edges and traversals.
//!
//! SQLite is the embedded default. SurrealDB is optional and needs a server
//! (or `mem://` for tests).

pub mod sqlite_store;
pub use sqlite_store::SqliteGraphStore;

#[cfg(feature = "surrealdb-backend")]
pub mod surreal_store;
#[cfg(feature = "surrealdb-backend")]
pub use surreal_store::SurrealGraphStore;

use crate::config::GraphDbConfig;
use crate::error::StorageError;
use crate::types::{Direction, Edge, Node, RelationType, TraceDirection};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Trait for graph database operations
///
/// `get_edges` must return edges ordered by creation time, then id; the default
/// traversals rely on it.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Short backend name for logs and health reports
    fn backend_name(&self) -> &'static str;

    /// Open the connection and create the schema if needed. Idempotent.
    async fn connect(&self) -> Result<()>;

    /// Idempotent
    async fn close(&self) -> Result<()>;

    /// Insert or replace a node by id
    async fn create_node(&self, node: &Node) -> Result<String>;

    async fn update_node(&self, node: &Node) -> Result<()> {
        self.create_node(node).await.map(|_| ())
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>>;

    /// Delete a node and every edge touching it. Returns false if it did not exist.
    async fn delete_node(&self, id: &str) -> Result<bool>;

    /// Insert or replace an edge by id
    async fn create_edge(&self, edge: &Edge) -> Result<String>;

    async fn get_edges(
        &self,
        node_id: &str,
        relations: Option<&[RelationType]>,
        direction: Direction,
    ) -> Result<Vec<Edge>>;

    async fn delete_edge(&self, id: &str) -> Result<bool>;

    async fn count_nodes(&self) -> Result<usize>;

    async fn count_edges(&self) -> Result<usize>;

    async fn health_check(&self) -> bool;

    /// Breadth-first neighbors in both directions up to `max_depth` hops,
    /// deduplicated, excluding the start node
    async fn get_neighbors(
        &self,
        node_id: &str,
        relations: Option<&[RelationType]>,
        max_depth: usize,
    ) -> Result<Vec<Node>> {
        let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut frontier = vec![node_id.to_string()];
        let mut neighbors = Vec::new();

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for current in &frontier {
                for edge in self.get_edges(current, relations, Direction::Both).await? {
                    let other = edge.other_end(current);
                    if !visited.insert(other.to_string()) {
                        continue;
                    }
                    // dangling edges are skipped
                    if let Some(node) = self.get_node(other).await? {
                        next.push(node.id.clone());
                        neighbors.push(node);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(neighbors)
    }

    /// Follow the first matching edge to an unvisited node until none matches or
    /// `max_depth` nodes are collected. The path starts at `node_id`; empty if the
    /// start node does not exist.
    async fn trace_path(
        &self,
        node_id: &str,
        relations: &[RelationType],
        direction: TraceDirection,
        max_depth: usize,
    ) -> Result<Vec<Node>> {
        let Some(start) = self.get_node(node_id).await? else {
            return Ok(Vec::new());
        };

        let filter = (!relations.is_empty()).then_some(relations);
        let mut visited: HashSet<String> = HashSet::from([start.id.clone()]);
        let mut path = vec![start];

        while path.len() < max_depth {
            let current = match path.last() {
                Some(node) => node.id.clone(),
                None => break,
            };
            let edges = self
                .get_edges(&current, filter, direction.as_edge_direction())
                .await?;

            let mut step = None;
            for edge in &edges {
                let other = edge.other_end(&current);
                if visited.contains(other) {
                    continue;
                }
                if let Some(node) = self.get_node(other).await? {
                    step = Some(node);
                    break;
                }
            }

            match step {
                Some(node) => {
                    visited.insert(node.id.clone());
                    path.push(node);
                }
                None => break,
            }
        }

        Ok(path)
    }
}

/// Keep edges whose relation is in `relations` (all edges when `None`)
pub(crate) fn matches_relation(edge: &Edge, relations: Option<&[RelationType]>) -> bool {
    relations.is_none_or(|set| set.contains(&edge.relation))
}

/// Build and connect the graph store named by `config.backend`
pub async fn create_graph_store(config: &GraphDbConfig) -> Result<Arc<dyn GraphStore>> {
    let store: Arc<dyn GraphStore> = match config.backend.as_str() {
        "sqlite" => {
            tracing::info!(
                "Using SQLite graph backend at {}",
                config.sqlite_path.display()
            );
            Arc::new(SqliteGraphStore::new(&config.sqlite_path))
        }
        #[cfg(feature = "surrealdb-backend")]
        "surrealdb" => {
            tracing::info!("Using SurrealDB graph backend at {}", config.surreal_url);
            Arc::new(SurrealGraphStore::new(config))
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
        .with_context(|| format!("Failed to connect {} graph store", store.backend_name()))?;
    Ok(store)
}

#[cfg(test)]
mod tests;
