//! Graph data model shared by the stores, the coordinator and the indexer.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

mod requests;
pub use requests::*;

/// Free-form key/value metadata attached to nodes, edges and vector payloads
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Declares a closed, string-backed enum with `as_str`, `ALL`, `Display` and `FromStr`.
///
/// Parsing is case-insensitive; the canonical form is SCREAMING_SNAKE_CASE.
macro_rules! graph_enum {
    ($(#[$meta:meta])* $name:ident, $err:ident, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_ascii_uppercase();
                match upper.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ValidationError::$err(s.to_string())),
                }
            }
        }
    };
}

graph_enum!(
    /// Kind of entity stored as a graph node
    NodeType, UnknownNodeType, {
        File => "FILE",
        Directory => "DIRECTORY",
        Function => "FUNCTION",
        Class => "CLASS",
        Method => "METHOD",
        Module => "MODULE",
        Variable => "VARIABLE",
        Document => "DOCUMENT",
        Section => "SECTION",
        Comment => "COMMENT",
        MetadataRecord => "METADATA_RECORD",
        Concept => "CONCEPT",
        Commit => "COMMIT",
        Branch => "BRANCH",
        Idea => "IDEA",
        Pattern => "PATTERN",
    }
);

graph_enum!(
    /// Typed relationship carried by a directed edge
    RelationType, UnknownRelationType, {
        Contains => "CONTAINS",
        PartOf => "PART_OF",
        Imports => "IMPORTS",
        Exports => "EXPORTS",
        Calls => "CALLS",
        CalledBy => "CALLED_BY",
        Inherits => "INHERITS",
        Implements => "IMPLEMENTS",
        References => "REFERENCES",
        Follows => "FOLLOWS",
        Precedes => "PRECEDES",
        EvolvesFrom => "EVOLVES_FROM",
        EvolvesTo => "EVOLVES_TO",
        RelatesTo => "RELATES_TO",
        Supports => "SUPPORTS",
        Contradicts => "CONTRADICTS",
        ResonatesWith => "RESONATES_WITH",
        Documents => "DOCUMENTS",
        DocumentedBy => "DOCUMENTED_BY",
        Causes => "CAUSES",
        CausedBy => "CAUSED_BY",
    }
);

/// Edge direction relative to a node when listing edges or neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
    #[default]
    Both,
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "out" | "outgoing" => Ok(Direction::Out),
            "in" | "incoming" => Ok(Direction::In),
            "both" => Ok(Direction::Both),
            _ => Err(ValidationError::InvalidDirection(s.to_string())),
        }
    }
}

/// Direction for path traces; `Forward` follows outgoing edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    Forward,
    #[default]
    Backward,
    Both,
}

impl TraceDirection {
    pub fn as_edge_direction(self) -> Direction {
        match self {
            TraceDirection::Forward => Direction::Out,
            TraceDirection::Backward => Direction::In,
            TraceDirection::Both => Direction::Both,
        }
    }
}

impl FromStr for TraceDirection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(TraceDirection::Forward),
            "backward" => Ok(TraceDirection::Backward),
            "both" => Ok(TraceDirection::Both),
            _ => Err(ValidationError::InvalidDirection(s.to_string())),
        }
    }
}

/// A node in the repository knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Repository-relative path, optionally with a `#symbol` fragment
    pub path: String,
    pub content: String,
    /// Only populated when the node is built for a write; the graph store does not keep it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub line_start: Option<usize>,
    #[serde(default)]
    pub line_end: Option<usize>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub commit_sha: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub semantic_scope: Option<String>,
    #[serde(default)]
    pub proficiency_level: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Node {
    /// New node with a deterministic id derived from type and path
    pub fn new(node_type: NodeType, path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: node_id_for(node_type, &path),
            node_type,
            path,
            content: content.into(),
            embedding: None,
            name: None,
            language: None,
            line_start: None,
            line_end: None,
            created_at: Utc::now(),
            updated_at: None,
            commit_sha: None,
            description: None,
            semantic_scope: None,
            proficiency_level: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Move the well-known metadata keys into their typed fields.
    ///
    /// Keys that are lifted are kept in `metadata` as well so payload filters can see them.
    pub fn absorb_metadata(&mut self, metadata: Metadata) {
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let line = |key: &str| {
            metadata
                .get(key)
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
        };

        self.name = text("name").or(self.name.take());
        self.language = text("language").or(self.language.take());
        self.line_start = line("line_start").or(self.line_start);
        self.line_end = line("line_end").or(self.line_end);
        self.description = text("description").or(self.description.take());
        self.semantic_scope = text("semantic_scope").or(self.semantic_scope.take());
        self.proficiency_level = text("proficiency_level").or(self.proficiency_level.take());
        self.commit_sha = text("commit_sha").or(self.commit_sha.take());
        self.metadata = metadata;
    }
}

/// A typed, weighted, directed edge between two node ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub relation: RelationType,
    #[serde(default = "default_weight")]
    pub weight: f32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_weight() -> f32 {
    1.0
}

impl Edge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, relation: RelationType) -> Self {
        let from_id = from_id.into();
        let to_id = to_id.into();
        Self {
            id: edge_id_for(&from_id, relation, &to_id),
            from_id,
            to_id,
            relation,
            weight: default_weight(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// The endpoint on the other side of `node_id`
    pub fn other_end(&self, node_id: &str) -> &str {
        if self.from_id == node_id {
            &self.to_id
        } else {
            &self.from_id
        }
    }
}

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic node id, so re-indexing the same entity upserts
pub fn node_id_for(node_type: NodeType, path: &str) -> String {
    short_digest(&[node_type.as_str(), path])
}

/// Deterministic edge id for `(from, relation, to)`
pub fn edge_id_for(from_id: &str, relation: RelationType, to_id: &str) -> String {
    short_digest(&[from_id, relation.as_str(), to_id])
}

/// A ranked query hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub node: Node,
    /// Vector similarity, or the decayed parent score for graph-only hits
    pub score: f32,
    /// Set for hits reached through graph expansion
    #[serde(default)]
    pub path_strength: Option<f32>,
    #[serde(default)]
    pub expanded_via_graph: bool,
}

impl QueryResult {
    /// Effective ranking strength
    pub fn strength(&self) -> f32 {
        self.path_strength.unwrap_or(self.score)
    }
}

/// A neighbor of a node together with the connecting edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedNode {
    #[serde(flatten)]
    pub node: Node,
    pub relationship: RelationType,
    pub weight: f32,
}

/// Lifecycle of a repository's last indexing pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Unknown,
    Pending,
    Running,
    Synced,
    Failed,
}

/// Last known indexing outcome for one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub repo: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub status: SyncState,
    pub nodes_count: usize,
    pub edges_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Record returned for repositories that were never indexed
    pub fn unknown(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            last_sync: None,
            status: SyncState::Unknown,
            nodes_count: 0,
            edges_count: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// One queued request to (re)index a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub id: String,
    pub repo_path: String,
    pub force: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Fatal error that failed the job
    pub error: Option<String>,
    /// Per-file errors that did not abort the pass
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub nodes_count: usize,
    #[serde(default)]
    pub edges_count: usize,
}

impl IndexJob {
    pub fn new(repo_path: impl Into<String>, force: bool) -> Self {
        let repo_path = repo_path.into();
        let created_at = Utc::now();
        let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = created_at.timestamp_nanos_opt().unwrap_or_default().to_string();
        let id = short_digest(&[&repo_path, &stamp, &seq.to_string()])[..12].to_string();
        Self {
            id,
            repo_path,
            force,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            errors: Vec::new(),
            nodes_count: 0,
            edges_count: 0,
        }
    }
}

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Per-backend health, healthy only when every backend is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub graph: bool,
    pub vectors: bool,
    pub healthy: bool,
}

impl HealthReport {
    pub fn new(graph: bool, vectors: bool) -> Self {
        Self {
            graph,
            vectors,
            healthy: graph && vectors,
        }
    }
}
