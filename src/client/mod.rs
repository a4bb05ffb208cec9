//! Core library client for repo-graph
//!
//! [`KnowledgeGraph`] owns the storage coordinator and the indexing service and
//! exposes the operations the MCP server publishes as tools.

use crate::config::Config;
use crate::error::{IndexingError, KgError, StorageError, ValidationError, classify};
use crate::indexing::IndexingService;
use crate::storage::StorageCoordinator;
use crate::types::*;
use anyhow::Context;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Longest trace `trace_concept` accepts
pub const MAX_TRACE_DEPTH: usize = 20;

/// Most neighbors `find_related` returns
pub const MAX_RELATED_LIMIT: usize = 100;

/// Candidates considered when picking the start node of a concept trace
const TRACE_CANDIDATES: usize = 5;

/// Extra candidates fetched when results are filtered by repository
const REPO_OVERFETCH: usize = 4;

pub type KgResult<T> = std::result::Result<T, KgError>;

fn out_of_range(field: &str, constraint: &str, actual: impl ToString) -> KgError {
    ValidationError::ConstraintViolation {
        field: field.to_string(),
        constraint: constraint.to_string(),
        actual: actual.to_string(),
    }
    .into()
}

/// Main client for the repository knowledge graph
///
/// # Example
///
/// ```no_run
/// use repo_graph::{KnowledgeGraph, QueryRequest};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let graph = KnowledgeGraph::new().await?;
///
///     let queued = graph.index_repository("/path/to/repo", false).await?;
///     println!("Queued job {}", queued.job_id);
///
///     let response = graph.query(QueryRequest::new("where are sections parsed")).await?;
///     for hit in response.results {
///         println!("{:.2} {}", hit.strength(), hit.node.path);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct KnowledgeGraph {
    pub(crate) storage: Arc<StorageCoordinator>,
    pub(crate) indexing: IndexingService,
    pub(crate) config: Arc<Config>,
}

impl KnowledgeGraph {
    /// Create a client from the default configuration file and environment
    pub async fn new() -> anyhow::Result<Self> {
        let config = Config::new().context("Failed to load configuration")?;
        Self::with_config(config).await
    }

    /// Connect the configured backends, load the embedding model and start the worker
    pub async fn with_config(config: Config) -> anyhow::Result<Self> {
        tracing::info!("Initializing knowledge graph client");
        tracing::debug!("Graph backend: {}", config.graph_db.backend);
        tracing::debug!("Vector backend: {}", config.vector_db.backend);
        tracing::debug!("Embedding model: {}", config.embedding.model_name);

        let storage = Arc::new(
            StorageCoordinator::from_config(&config)
                .await
                .context("Failed to initialize storage")?,
        );
        Self::with_storage(storage, config).await
    }

    /// Wrap an existing coordinator; the indexing worker is started here
    pub async fn with_storage(
        storage: Arc<StorageCoordinator>,
        config: Config,
    ) -> anyhow::Result<Self> {
        let indexing = IndexingService::new(Arc::clone(&storage), config.indexing.clone())
            .context("Failed to initialize indexing service")?;
        indexing.start_worker().await;

        Ok(Self {
            storage,
            indexing,
            config: Arc::new(config),
        })
    }

    pub fn storage(&self) -> &Arc<StorageCoordinator> {
        &self.storage
    }

    pub fn indexing(&self) -> &IndexingService {
        &self.indexing
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queue a repository for indexing
    pub async fn index_repository(&self, path: &str, force: bool) -> KgResult<IndexResponse> {
        if path.trim().is_empty() {
            return Err(ValidationError::Empty("path".to_string()).into());
        }
        let job_id = self.indexing.queue_index(path, force).await;
        Ok(IndexResponse {
            path: path.to_string(),
            status: "queued".to_string(),
            job_id,
        })
    }

    pub async fn sync_status(&self, repo: &str) -> SyncStatus {
        self.indexing.get_sync_status(repo).await
    }

    /// Queue a forced re-index of `path`
    pub async fn force_sync(&self, path: &str) -> KgResult<IndexResponse> {
        if path.trim().is_empty() {
            return Err(ValidationError::Empty("path".to_string()).into());
        }
        let job_id = self.indexing.force_sync(path).await;
        Ok(IndexResponse {
            path: path.to_string(),
            status: "queued".to_string(),
            job_id,
        })
    }

    /// Drop the sync record for `repo`; indexed nodes stay in the stores
    pub async fn remove_repository(&self, repo: &str) -> RemoveResponse {
        RemoveResponse {
            repo: repo.to_string(),
            removed: self.indexing.remove_repo(repo).await,
        }
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.indexing.queue_stats().await
    }

    pub async fn job_status(&self, job_id: &str) -> KgResult<IndexJob> {
        self.indexing
            .get_job_status(job_id)
            .await
            .ok_or_else(|| IndexingError::JobNotFound(job_id.to_string()).into())
    }

    /// Semantic search, expanded through the graph when `include_context` is set
    pub async fn query(&self, request: QueryRequest) -> KgResult<QueryResponse> {
        if request.query.trim().is_empty() {
            return Err(ValidationError::Empty("query".to_string()).into());
        }
        if request.limit == 0 {
            return Err(out_of_range("limit", "at least 1", request.limit));
        }
        let min_score = request.min_score.unwrap_or(self.config.search.min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(out_of_range("min_score", "between 0.0 and 1.0", min_score));
        }
        let node_types = request
            .node_types
            .iter()
            .map(|t| NodeType::from_str(t))
            .collect::<Result<Vec<_>, _>>()?;
        let type_filter = (!node_types.is_empty()).then_some(node_types.as_slice());

        let start = Instant::now();
        let fetch = match request.repo {
            Some(_) => request.limit * REPO_OVERFETCH,
            None => request.limit,
        };
        let mut results = self
            .storage
            .query(
                &request.query,
                fetch,
                type_filter,
                request.include_context,
                min_score,
            )
            .await
            .map_err(classify)?;

        if let Some(repo) = &request.repo {
            results.retain(|r| {
                r.node.metadata.get("repo").and_then(|v| v.as_str()) == Some(repo.as_str())
            });
        }
        results.truncate(request.limit);

        Ok(QueryResponse {
            query: request.query,
            count: results.len(),
            results,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn get_node(&self, node_id: &str) -> KgResult<Node> {
        self.storage
            .get_node(node_id)
            .await
            .map_err(classify)?
            .ok_or_else(|| StorageError::not_found("node", node_id).into())
    }

    /// Find the best match for `concept` and follow its EVOLVES_FROM chain
    pub async fn trace_concept(&self, concept: &str, depth: usize) -> KgResult<TraceResponse> {
        if concept.trim().is_empty() {
            return Err(ValidationError::Empty("concept".to_string()).into());
        }
        if !(1..=MAX_TRACE_DEPTH).contains(&depth) {
            return Err(out_of_range("depth", "between 1 and 20", depth));
        }

        let candidates = self
            .storage
            .query(concept, TRACE_CANDIDATES, None, false, 0.0)
            .await
            .map_err(classify)?;

        let history = match candidates.first() {
            Some(top) => self
                .storage
                .trace_evolution(&top.node.id, TraceDirection::Backward, depth)
                .await
                .map_err(classify)?,
            None => Vec::new(),
        };

        Ok(TraceResponse {
            concept: concept.to_string(),
            count: history.len(),
            history,
        })
    }

    /// Direct neighbors of `node_id`, optionally restricted to one relation type
    pub async fn find_related(
        &self,
        node_id: &str,
        relationship_type: Option<&str>,
        limit: usize,
    ) -> KgResult<RelatedResponse> {
        if !(1..=MAX_RELATED_LIMIT).contains(&limit) {
            return Err(out_of_range("limit", "between 1 and 100", limit));
        }
        let relation = relationship_type.map(RelationType::from_str).transpose()?;

        let related = self
            .storage
            .find_related(node_id, relation, limit)
            .await
            .map_err(classify)?;

        Ok(RelatedResponse {
            node_id: node_id.to_string(),
            count: related.len(),
            related,
        })
    }

    pub async fn health(&self) -> HealthReport {
        self.storage.health_check().await
    }

    /// Stop the worker and close both stores
    pub async fn shutdown(&self) -> KgResult<()> {
        self.indexing.stop_worker().await;
        self.storage.close().await.map_err(classify)
    }
}
