//! Embedded SQLite graph store

use super::{GraphStore, matches_relation};
use crate::error::StorageError;
use crate::types::{Direction, Edge, Metadata, Node, NodeType, RelationType};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    name TEXT,
    language TEXT,
    line_start INTEGER,
    line_end INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    commit_sha TEXT,
    description TEXT,
    semantic_scope TEXT,
    proficiency_level TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);

CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
CREATE INDEX IF NOT EXISTS idx_edges_relation ON edges(relation);
";

const NODE_COLUMNS: &str = "id, node_type, path, content, name, language, line_start, line_end, \
     created_at, updated_at, commit_sha, description, semantic_scope, proficiency_level, metadata";

const EDGE_COLUMNS: &str = "id, from_id, to_id, relation, weight, created_at, metadata";

/// SQLite-backed graph store.
///
/// All calls run on the blocking pool under one connection mutex. Edge endpoints
/// are not checked, so edges may be written before their nodes.
pub struct SqliteGraphStore {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteGraphStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("SQLite connection lock poisoned: {}", e))?;
            let conn = guard
                .as_mut()
                .ok_or_else(|| StorageError::NotConnected("sqlite".to_string()))?;
            f(conn)
        })
        .await
        .context("SQLite task panicked")?
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    // fixed width so ORDER BY created_at sorts chronologically
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_time(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_metadata(idx: usize, text: &str) -> rusqlite::Result<Metadata> {
    serde_json::from_str(text).map_err(|e| conversion_error(idx, e))
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let node_type: String = row.get(1)?;
    let created_at: String = row.get(8)?;
    let updated_at: Option<String> = row.get(9)?;
    let metadata: String = row.get(14)?;
    let line_start: Option<i64> = row.get(6)?;
    let line_end: Option<i64> = row.get(7)?;

    Ok(Node {
        id: row.get(0)?,
        node_type: NodeType::from_str(&node_type).map_err(|e| conversion_error(1, e))?,
        path: row.get(2)?,
        content: row.get(3)?,
        embedding: None,
        name: row.get(4)?,
        language: row.get(5)?,
        line_start: line_start.map(|n| n as usize),
        line_end: line_end.map(|n| n as usize),
        created_at: parse_time(8, &created_at)?,
        updated_at: updated_at.map(|t| parse_time(9, &t)).transpose()?,
        commit_sha: row.get(10)?,
        description: row.get(11)?,
        semantic_scope: row.get(12)?,
        proficiency_level: row.get(13)?,
        metadata: parse_metadata(14, &metadata)?,
    })
}

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let relation: String = row.get(3)?;
    let weight: f64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let metadata: String = row.get(6)?;

    Ok(Edge {
        id: row.get(0)?,
        from_id: row.get(1)?,
        to_id: row.get(2)?,
        relation: RelationType::from_str(&relation).map_err(|e| conversion_error(3, e))?,
        weight: weight as f32,
        created_at: parse_time(5, &created_at)?,
        metadata: parse_metadata(6, &metadata)?,
    })
}

#[async_trait::async_trait]
impl GraphStore for SqliteGraphStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&self) -> Result<()> {
        let path = self.path.clone();
        let slot = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = slot
                .lock()
                .map_err(|e| anyhow::anyhow!("SQLite connection lock poisoned: {}", e))?;
            if guard.is_some() {
                return Ok(());
            }

            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create graph directory {}", parent.display())
                })?;
            }

            let conn = Connection::open(&path)
                .map_err(|e| StorageError::unavailable("sqlite", e))?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA)
                .context("Failed to create graph schema")?;

            tracing::info!("Connected to SQLite graph store at {}", path.display());
            *guard = Some(conn);
            Ok(())
        })
        .await
        .context("SQLite task panicked")?
    }

    async fn close(&self) -> Result<()> {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = slot
                .lock()
                .map_err(|e| anyhow::anyhow!("SQLite connection lock poisoned: {}", e))?;
            if let Some(conn) = guard.take() {
                conn.close()
                    .map_err(|(_, e)| anyhow::anyhow!("Failed to close SQLite: {}", e))?;
                tracing::info!("Closed SQLite graph store");
            }
            Ok(())
        })
        .await
        .context("SQLite task panicked")?
    }

    async fn create_node(&self, node: &Node) -> Result<String> {
        let node = node.clone();
        self.with_conn(move |conn| {
            let metadata = serde_json::to_string(&node.metadata)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            conn.execute(
                "INSERT INTO nodes (id, node_type, path, content, name, language, line_start,
                    line_end, created_at, updated_at, commit_sha, description, semantic_scope,
                    proficiency_level, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(id) DO UPDATE SET
                    node_type = excluded.node_type,
                    path = excluded.path,
                    content = excluded.content,
                    name = excluded.name,
                    language = excluded.language,
                    line_start = excluded.line_start,
                    line_end = excluded.line_end,
                    updated_at = ?16,
                    commit_sha = excluded.commit_sha,
                    description = excluded.description,
                    semantic_scope = excluded.semantic_scope,
                    proficiency_level = excluded.proficiency_level,
                    metadata = excluded.metadata",
                params![
                    node.id,
                    node.node_type.as_str(),
                    node.path,
                    node.content,
                    node.name,
                    node.language,
                    node.line_start.map(|n| n as i64),
                    node.line_end.map(|n| n as i64),
                    timestamp(&node.created_at),
                    node.updated_at.as_ref().map(timestamp),
                    node.commit_sha,
                    node.description,
                    node.semantic_scope,
                    node.proficiency_level,
                    metadata,
                    timestamp(&Utc::now()),
                ],
            )
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

            tracing::debug!("Upserted node {} ({})", node.id, node.node_type);
            Ok(node.id)
        })
        .await
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS);
            conn.query_row(&sql, [&id], node_from_row)
                .optional()
                .map_err(|e| anyhow::Error::from(StorageError::QueryFailed(e.to_string())))
        })
        .await
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let edges = tx.execute(
                "DELETE FROM edges WHERE from_id = ?1 OR to_id = ?1",
                [&id],
            )?;
            let nodes = tx.execute("DELETE FROM nodes WHERE id = ?1", [&id])?;
            tx.commit()
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

            if nodes > 0 {
                tracing::debug!("Deleted node {} and {} edges", id, edges);
            }
            Ok(nodes > 0)
        })
        .await
    }

    async fn create_edge(&self, edge: &Edge) -> Result<String> {
        let edge = edge.clone();
        self.with_conn(move |conn| {
            let metadata = serde_json::to_string(&edge.metadata)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            // created_at is kept from the first write so edge order is stable
            conn.execute(
                "INSERT INTO edges (id, from_id, to_id, relation, weight, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    from_id = excluded.from_id,
                    to_id = excluded.to_id,
                    relation = excluded.relation,
                    weight = excluded.weight,
                    metadata = excluded.metadata",
                params![
                    edge.id,
                    edge.from_id,
                    edge.to_id,
                    edge.relation.as_str(),
                    edge.weight as f64,
                    timestamp(&edge.created_at),
                    metadata,
                ],
            )
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

            tracing::debug!(
                "Upserted edge {} -[{}]-> {}",
                edge.from_id,
                edge.relation,
                edge.to_id
            );
            Ok(edge.id)
        })
        .await
    }

    async fn get_edges(
        &self,
        node_id: &str,
        relations: Option<&[RelationType]>,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        let node_id = node_id.to_string();
        let relations = relations.map(|r| r.to_vec());
        self.with_conn(move |conn| {
            let condition = match direction {
                Direction::Out => "from_id = ?1",
                Direction::In => "to_id = ?1",
                Direction::Both => "(from_id = ?1 OR to_id = ?1)",
            };
            let sql = format!(
                "SELECT {} FROM edges WHERE {} ORDER BY created_at, id",
                EDGE_COLUMNS, condition
            );
            let mut stmt = conn.prepare(&sql)?;
            let edges = stmt
                .query_map([&node_id], edge_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

            Ok(edges
                .into_iter()
                .filter(|e| matches_relation(e, relations.as_deref()))
                .collect())
        })
        .await
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM edges WHERE id = ?1", [&id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn count_nodes(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn count_edges(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
        .is_ok()
    }
}
