use super::{Node, QueryResult, RelatedNode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request to index (or re-index) a repository
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IndexRequest {
    /// Path to the repository directory
    pub path: String,
    /// Re-index even if the repository was indexed before
    #[serde(default)]
    pub force: bool,
}

/// Acknowledgement for a queued index job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub path: String,
    /// Always "queued"; poll `job_status` for progress
    pub status: String,
    pub job_id: String,
}

/// Request naming a repository by its identifier (the directory name)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RepoRequest {
    /// Repository identifier, e.g. "my-repo" for /work/my-repo
    pub repo: String,
}

/// Request to queue a forced re-index
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncRequest {
    /// Path to the repository directory
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub repo: String,
    pub removed: bool,
}

/// Request with no parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct EmptyRequest {}

/// Semantic query over the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryRequest {
    /// Natural-language or code query
    pub query: String,
    /// Only return nodes indexed from this repository
    #[serde(default)]
    pub repo: Option<String>,
    /// Number of results to return (default: 10)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Pull in graph neighbors of the best hits (default: true)
    #[serde(default = "default_include_context")]
    pub include_context: bool,
    /// Restrict to these node types, e.g. ["FUNCTION", "CLASS"]
    #[serde(default)]
    pub node_types: Vec<String>,
    /// Minimum similarity score (0.0 to 1.0); the configured default when omitted
    #[serde(default)]
    pub min_score: Option<f32>,
}

fn default_limit() -> usize {
    10
}

fn default_include_context() -> bool {
    true
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            repo: None,
            limit: default_limit(),
            include_context: default_include_context(),
            node_types: Vec::new(),
            min_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<QueryResult>,
    pub count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeRequest {
    /// Node id as returned by a query
    pub node_id: String,
}

/// Trace how a concept evolved
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TraceRequest {
    /// Concept to look up; the best match is the start of the trace
    pub concept: String,
    /// Maximum number of nodes in the trace, 1 to 20 (default: 5)
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceResponse {
    pub concept: String,
    /// Start node first, then its ancestors
    pub history: Vec<Node>,
    pub count: usize,
}

/// Direct neighbors of a node
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelatedRequest {
    pub node_id: String,
    /// Only follow edges of this relation, e.g. "PART_OF"
    #[serde(default)]
    pub relationship_type: Option<String>,
    /// Maximum number of neighbors, 1 to 100 (default: 10)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedResponse {
    pub node_id: String,
    pub related: Vec<RelatedNode>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRequest {
    /// Job id returned by `index_repository` or `force_sync`
    pub job_id: String,
}
