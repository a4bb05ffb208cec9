use crate::client::KnowledgeGraph;
use crate::error::KgError;
use crate::types::*;

use anyhow::{Context, Result};
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
};
use serde::Serialize;

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Serialization failed: {}", e))
}

/// Tool error text; transient backend failures are marked so callers can retry
fn tool_error(err: KgError) -> String {
    if err.is_retryable() {
        format!("{} (temporary failure, retry later)", err)
    } else {
        err.to_string()
    }
}

#[derive(Clone)]
pub struct RepoGraphServer {
    graph: KnowledgeGraph,
    tool_router: ToolRouter<Self>,
}

impl RepoGraphServer {
    /// Create a server over a client built from the default configuration
    pub async fn new() -> Result<Self> {
        let graph = KnowledgeGraph::new().await?;
        Ok(Self::with_graph(graph))
    }

    pub fn with_graph(graph: KnowledgeGraph) -> Self {
        Self {
            graph,
            tool_router: Self::tool_router(),
        }
    }

    /// Get the underlying client
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }
}

#[tool_router(router = tool_router)]
impl RepoGraphServer {
    #[tool(
        description = "Queue a repository directory for indexing into the knowledge graph. Returns a job id; poll job_status or index_status for progress."
    )]
    async fn index_repository(
        &self,
        Parameters(req): Parameters<IndexRequest>,
    ) -> Result<String, String> {
        let response = self
            .graph
            .index_repository(&req.path, req.force)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(description = "Get the sync status of an indexed repository")]
    async fn index_status(
        &self,
        Parameters(req): Parameters<RepoRequest>,
    ) -> Result<String, String> {
        to_json(&self.graph.sync_status(&req.repo).await)
    }

    #[tool(description = "Queue a forced re-index of a repository directory")]
    async fn force_sync(&self, Parameters(req): Parameters<SyncRequest>) -> Result<String, String> {
        let response = self
            .graph
            .force_sync(&req.path)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(
        description = "Forget the sync status of a repository. Nodes already in the graph are kept."
    )]
    async fn remove_repository(
        &self,
        Parameters(req): Parameters<RepoRequest>,
    ) -> Result<String, String> {
        to_json(&self.graph.remove_repository(&req.repo).await)
    }

    #[tool(description = "Get counts of pending, running, completed and failed index jobs")]
    async fn queue_status(
        &self,
        Parameters(_req): Parameters<EmptyRequest>,
    ) -> Result<String, String> {
        to_json(&self.graph.queue_stats().await)
    }

    #[tool(
        description = "Semantic search over the knowledge graph, optionally expanded with graph neighbors of the best hits"
    )]
    async fn graph_query(
        &self,
        Parameters(req): Parameters<QueryRequest>,
    ) -> Result<String, String> {
        let response = self.graph.query(req).await.map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(description = "Fetch a single node by id")]
    async fn get_node(&self, Parameters(req): Parameters<NodeRequest>) -> Result<String, String> {
        let node = self
            .graph
            .get_node(&req.node_id)
            .await
            .map_err(tool_error)?;

        to_json(&node)
    }

    #[tool(
        description = "Find the node that best matches a concept and follow its EVOLVES_FROM history"
    )]
    async fn trace_concept(
        &self,
        Parameters(req): Parameters<TraceRequest>,
    ) -> Result<String, String> {
        let response = self
            .graph
            .trace_concept(&req.concept, req.depth)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(description = "List the direct neighbors of a node, optionally by relationship type")]
    async fn find_related(
        &self,
        Parameters(req): Parameters<RelatedRequest>,
    ) -> Result<String, String> {
        let response = self
            .graph
            .find_related(&req.node_id, req.relationship_type.as_deref(), req.limit)
            .await
            .map_err(tool_error)?;

        to_json(&response)
    }

    #[tool(description = "Get the state of an index job")]
    async fn job_status(&self, Parameters(req): Parameters<JobRequest>) -> Result<String, String> {
        let job = self
            .graph
            .job_status(&req.job_id)
            .await
            .map_err(tool_error)?;

        to_json(&job)
    }

    #[tool(description = "Check that the graph and vector backends are reachable")]
    async fn health(&self, Parameters(_req): Parameters<EmptyRequest>) -> Result<String, String> {
        to_json(&self.graph.health().await)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for RepoGraphServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "repo-graph".into(),
                title: Some("Repo Graph - Repository Knowledge Graph".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Knowledge graph over code and docs. \
                Use index_repository to queue a repository, job_status to follow the job, \
                graph_query to search, and get_node, find_related or trace_concept to walk the graph."
                    .into(),
            ),
        }
    }
}

impl RepoGraphServer {
    pub async fn serve_stdio() -> Result<()> {
        tracing::info!("Starting repo-graph MCP server");

        let server = Self::new().await.context("Failed to create MCP server")?;
        let graph = server.graph.clone();

        let transport = rmcp::transport::io::stdio();

        server.serve(transport).await?.waiting().await?;

        graph.shutdown().await?;
        Ok(())
    }
}
