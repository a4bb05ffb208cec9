//! # Repo Graph - Knowledge Graph over Code and Documentation
//!
//! A Rust-based Model Context Protocol (MCP) server that indexes repositories into a
//! knowledge graph: typed nodes (files, functions, classes, sections, metadata records)
//! joined by typed edges, with every node embedded for semantic search.
//!
//! ## Overview
//!
//! Repositories are walked and parsed with tree-sitter (code), a heading-aware markdown
//! parser and a YAML metadata parser. Each entity becomes a node in a graph store and a
//! vector in a vector store; queries rank by vector similarity and then pull in graph
//! neighbors of the best hits.
//!
//! ## Key Features
//!
//! - **Semantic Search**: FastEmbed (all-MiniLM-L6-v2) for local embeddings
//! - **Graph Expansion**: neighbors of the top hits are added with a decayed score
//! - **Pluggable Graph Store**: SQLite (embedded, default) or SurrealDB
//! - **Pluggable Vector Store**: LanceDB (embedded, default) or Qdrant (external server)
//! - **Background Indexing**: a job queue drained by a single worker task
//! - **MCP Protocol**: 11 tools for AI assistant integration
//!
//! ## Architecture
//!
//! ```text
//!        MCP Client (stdio)
//!              |
//!       RepoGraphServer
//!              |
//!        KnowledgeGraph ---- IndexingService (queue + worker)
//!              |                    |
//!              +---- StorageCoordinator <---- parsers
//!                    |        |        |
//!               Embedder  GraphStore  VectorStore
//! ```
//!
//! ## Modules
//!
//! - [`mcp_server`]: MCP protocol server exposing the client operations as tools
//! - [`client`]: The [`KnowledgeGraph`] facade
//! - [`indexing`]: Job queue, worker and the per-repository indexing pass
//! - [`storage`]: Coordinates the embedder and both stores
//! - [`parsers`]: Code, markdown and metadata entity parsers
//! - [`embedding`]: Embedding generation using FastEmbed
//! - [`graph_db`]: Graph store abstraction (SQLite and SurrealDB)
//! - [`vector_db`]: Vector store abstraction (LanceDB and Qdrant)
//! - [`config`]: Configuration management with environment variable support
//! - [`types`]: Graph model and MCP request/response types
//! - [`error`]: Error types and result aliases
//! - [`paths`]: Platform-specific default locations
//!
//! ## Usage Example
//!
//! ```no_run
//! use repo_graph::mcp_server::RepoGraphServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Serve over stdio (MCP protocol) with the default configuration
//!     RepoGraphServer::serve_stdio().await?;
//!
//!     Ok(())
//! }
//! ```

/// The knowledge graph client used by the MCP server
pub mod client;

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding generation using FastEmbed (all-MiniLM-L6-v2)
pub mod embedding;

/// Error types and utilities
pub mod error;

/// Graph store abstraction supporting SQLite and SurrealDB
pub mod graph_db;

/// Background indexing of repositories
pub mod indexing;

/// MCP server implementation
pub mod mcp_server;

/// Entity parsers for source code, markdown and metadata files
pub mod parsers;

/// Platform-specific default paths
pub mod paths;

/// Writes and queries spanning the embedder and both stores
pub mod storage;

/// Graph model and MCP request/response types with JSON schema definitions
pub mod types;

/// Vector database abstraction supporting LanceDB and Qdrant
pub mod vector_db;

#[cfg(test)]
pub(crate) mod testing;

pub use client::KnowledgeGraph;
pub use config::Config;
pub use error::KgError;
pub use types::*;
