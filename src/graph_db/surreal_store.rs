//! SurrealDB graph store (networked; `mem://` for tests)

use super::{GraphStore, matches_relation};
use crate::config::GraphDbConfig;
use crate::error::StorageError;
use crate::types::{Direction, Edge, Node, RelationType};
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tokio::sync::RwLock;

/// Stored node record. The full node is kept as JSON so schema changes on our
/// side never need a SurrealDB migration.
#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    node_id: String,
    node_type: String,
    path: String,
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRecord {
    edge_id: String,
    from_id: String,
    to_id: String,
    relation: String,
    created_at: String,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct Payload {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

pub struct SurrealGraphStore {
    url: String,
    namespace: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
    db: RwLock<Option<Surreal<Any>>>,
}

impl SurrealGraphStore {
    pub fn new(config: &GraphDbConfig) -> Self {
        Self {
            url: config.surreal_url.clone(),
            namespace: config.namespace.clone(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            db: RwLock::new(None),
        }
    }

    async fn client(&self) -> Result<Surreal<Any>> {
        self.db
            .read()
            .await
            .clone()
            .ok_or_else(|| StorageError::NotConnected("surrealdb".to_string()).into())
    }

    fn decode<T: serde::de::DeserializeOwned>(payload: &str) -> Result<T> {
        serde_json::from_str(payload)
            .map_err(|e| StorageError::Serialization(e.to_string()).into())
    }

    async fn edge_rows(&self, query: &str, node_id: &str) -> Result<Vec<Edge>> {
        let db = self.client().await?;
        let mut response = db
            .query(query)
            .bind(("id", node_id.to_string()))
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        let rows: Vec<Payload> = response
            .take(0)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        rows.iter().map(|r| Self::decode(&r.payload)).collect()
    }

    async fn count(&self, table: &str) -> Result<usize> {
        let db = self.client().await?;
        let mut response = db
            .query(format!("SELECT count() AS count FROM {} GROUP ALL", table))
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        let rows: Vec<CountRow> = response
            .take(0)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(rows.first().map(|r| r.count as usize).unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl GraphStore for SurrealGraphStore {
    fn backend_name(&self) -> &'static str {
        "surrealdb"
    }

    async fn connect(&self) -> Result<()> {
        let mut slot = self.db.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let db = surrealdb::engine::any::connect(self.url.as_str())
            .await
            .map_err(|e| StorageError::unavailable("surrealdb", e))?;

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            db.signin(surrealdb::opt::auth::Root {
                username,
                password,
            })
            .await
            .context("SurrealDB authentication failed")?;
        }

        db.use_ns(&self.namespace)
            .use_db(&self.database)
            .await
            .context("Failed to select SurrealDB namespace/database")?;

        db.query(
            "DEFINE INDEX IF NOT EXISTS edge_from ON TABLE edge COLUMNS from_id;
             DEFINE INDEX IF NOT EXISTS edge_to ON TABLE edge COLUMNS to_id;",
        )
        .await
        .and_then(|r| r.check())
        .context("Failed to define SurrealDB indexes")?;

        tracing::info!(
            "Connected to SurrealDB graph store at {} ({}/{})",
            self.url,
            self.namespace,
            self.database
        );
        *slot = Some(db);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.db.write().await.take().is_some() {
            tracing::info!("Closed SurrealDB graph store");
        }
        Ok(())
    }

    async fn create_node(&self, node: &Node) -> Result<String> {
        let db = self.client().await?;
        let mut stored = node.clone();
        stored.embedding = None;
        let record = NodeRecord {
            node_id: node.id.clone(),
            node_type: node.node_type.as_str().to_string(),
            path: node.path.clone(),
            payload: serde_json::to_string(&stored)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        };

        db.query("UPSERT type::thing('node', $id) CONTENT $record")
            .bind(("id", node.id.clone()))
            .bind(("record", record))
            .await
            .and_then(|r| r.check())
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        tracing::debug!("Upserted node {} ({})", node.id, node.node_type);
        Ok(node.id.clone())
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let db = self.client().await?;
        let mut response = db
            .query("SELECT payload FROM type::thing('node', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        let rows: Vec<Payload> = response
            .take(0)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.first().map(|r| Self::decode(&r.payload)).transpose()
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        if self.get_node(id).await?.is_none() {
            return Ok(false);
        }

        let db = self.client().await?;
        db.query(
            "BEGIN TRANSACTION;
             DELETE edge WHERE from_id = $id OR to_id = $id;
             DELETE type::thing('node', $id);
             COMMIT TRANSACTION;",
        )
        .bind(("id", id.to_string()))
        .await
        .and_then(|r| r.check())
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        tracing::debug!("Deleted node {} and its edges", id);
        Ok(true)
    }

    async fn create_edge(&self, edge: &Edge) -> Result<String> {
        for endpoint in [&edge.from_id, &edge.to_id] {
            if self.get_node(endpoint).await?.is_none() {
                return Err(StorageError::not_found("node", endpoint.as_str()).into());
            }
        }

        let db = self.client().await?;

        // created_at is kept from the first write so edge order is stable
        let mut response = db
            .query("SELECT payload FROM type::thing('edge', $id)")
            .bind(("id", edge.id.clone()))
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        let existing: Vec<Payload> = response
            .take(0)
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        let mut edge = edge.clone();
        if let Some(row) = existing.first() {
            let previous: Edge = Self::decode(&row.payload)?;
            edge.created_at = previous.created_at;
        }

        let record = EdgeRecord {
            edge_id: edge.id.clone(),
            from_id: edge.from_id.clone(),
            to_id: edge.to_id.clone(),
            relation: edge.relation.as_str().to_string(),
            created_at: edge
                .created_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            payload: serde_json::to_string(&edge)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        };

        db.query("UPSERT type::thing('edge', $id) CONTENT $record")
            .bind(("id", edge.id.clone()))
            .bind(("record", record))
            .await
            .and_then(|r| r.check())
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        tracing::debug!(
            "Upserted edge {} -[{}]-> {}",
            edge.from_id,
            edge.relation,
            edge.to_id
        );
        Ok(edge.id.clone())
    }

    async fn get_edges(
        &self,
        node_id: &str,
        relations: Option<&[RelationType]>,
        direction: Direction,
    ) -> Result<Vec<Edge>> {
        let condition = match direction {
            Direction::Out => "from_id = $id",
            Direction::In => "to_id = $id",
            Direction::Both => "from_id = $id OR to_id = $id",
        };
        let query = format!(
            "SELECT payload, created_at, edge_id FROM edge WHERE {} ORDER BY created_at, edge_id",
            condition
        );

        let edges = self.edge_rows(&query, node_id).await?;
        Ok(edges
            .into_iter()
            .filter(|e| matches_relation(e, relations))
            .collect())
    }

    async fn delete_edge(&self, id: &str) -> Result<bool> {
        let db = self.client().await?;
        let mut response = db
            .query("DELETE type::thing('edge', $id) RETURN BEFORE")
            .bind(("id", id.to_string()))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let removed: Vec<Payload> = response
            .take(0)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(!removed.is_empty())
    }

    async fn count_nodes(&self) -> Result<usize> {
        self.count("node").await
    }

    async fn count_edges(&self) -> Result<usize> {
        self.count("edge").await
    }

    async fn health_check(&self) -> bool {
        match self.client().await {
            Ok(db) => db.health().await.is_ok(),
            Err(_) => false,
        }
    }
}
