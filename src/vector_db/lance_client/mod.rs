//! LanceDB vector store (embedded, no server required)
//!
//! `content` lives in its own column and the rest of the payload is kept as a
//! JSON text column, so both come back exactly as stored. `node_type` and
//! `path` are duplicated into columns so they can be pushed down as filters.

use super::{
    PayloadFilter, VectorHit, VectorRecord, VectorStore, clamp_score, finalize_hits,
    payload_matches,
};
use crate::error::{EmbeddingError, StorageError};
use crate::types::Metadata;
use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    types::Float32Type,
};
use arrow_schema::{DataType, Field, Schema};
use futures::stream::TryStreamExt;
use lancedb::DistanceType;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Extra candidates fetched per requested hit when a filter cannot be pushed down
const OVERFETCH_FACTOR: usize = 4;

/// Payload keys that are also stored as columns
const COLUMN_KEYS: [&str; 2] = ["node_type", "path"];

pub struct LanceVectorStore {
    db_path: String,
    table_name: String,
    dimension: usize,
    connection: RwLock<Option<Connection>>,
}

impl LanceVectorStore {
    pub fn new(db_path: &str, table_name: &str, dimension: usize) -> Self {
        Self {
            db_path: db_path.to_string(),
            table_name: table_name.to_string(),
            dimension,
            connection: RwLock::new(None),
        }
    }

    /// Get default database path
    pub fn default_lancedb_path() -> String {
        crate::paths::PlatformPaths::default_lancedb_path()
            .to_string_lossy()
            .to_string()
    }

    /// Create schema for the vectors table
    fn create_schema(dimension: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
            Field::new("id", DataType::Utf8, false),
            Field::new("node_type", DataType::Utf8, true),
            Field::new("path", DataType::Utf8, true),
            Field::new("content", DataType::Utf8, true),
            Field::new("payload_json", DataType::Utf8, false),
        ]))
    }

    async fn get_table(&self) -> Result<Table> {
        let connection = self
            .connection
            .read()
            .await
            .clone()
            .ok_or_else(|| StorageError::NotConnected("lancedb".to_string()))?;
        connection
            .open_table(&self.table_name)
            .execute()
            .await
            .context("Failed to open table")
    }

    /// Split a payload into its column values and the JSON remainder
    #[allow(clippy::type_complexity)]
    fn split_payload(
        mut payload: Metadata,
    ) -> Result<(Option<String>, Option<String>, Option<String>, String)> {
        let text = |payload: &Metadata, key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let node_type = text(&payload, "node_type");
        let path = text(&payload, "path");
        // only a string content moves to its column; anything else stays in the JSON
        let content = match payload.remove("content") {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => {
                payload.insert("content".to_string(), other);
                None
            }
            None => None,
        };
        let json = serde_json::to_string(&payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok((node_type, path, content, json))
    }

    fn join_payload(json: &str, content: Option<&str>) -> Result<Metadata> {
        let mut payload: Metadata = serde_json::from_str(json)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(content) = content {
            payload.insert("content".to_string(), serde_json::json!(content));
        }
        Ok(payload)
    }

    fn create_record_batch(
        &self,
        id: &str,
        vector: Vec<f32>,
        payload: Metadata,
    ) -> Result<RecordBatch> {
        let (node_type, path, content, json) = Self::split_payload(payload)?;
        let schema = Self::create_schema(self.dimension);

        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vec![Some(vector.into_iter().map(Some))],
            self.dimension as i32,
        );

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(vector_array),
                Arc::new(StringArray::from(vec![id])),
                Arc::new(StringArray::from(vec![node_type])),
                Arc::new(StringArray::from(vec![path])),
                Arc::new(StringArray::from(vec![content])),
                Arc::new(StringArray::from(vec![json])),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// SQL predicate for the filter keys that have their own column
    fn pushdown(filter: Option<&PayloadFilter>) -> Option<String> {
        let filter = filter?;
        let clauses: Vec<String> = COLUMN_KEYS
            .iter()
            .filter_map(|key| {
                filter
                    .get(*key)
                    .and_then(|v| v.as_str())
                    .map(|v| format!("{} = '{}'", key, escape(v)))
            })
            .collect();
        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }

    /// True if some filter key must be checked after the search
    fn needs_postfilter(filter: Option<&PayloadFilter>) -> bool {
        filter.is_some_and(|f| {
            f.iter()
                .any(|(k, v)| !COLUMN_KEYS.contains(&k.as_str()) || !v.is_string())
        })
    }
}

/// Quote a value for a Lance SQL string literal
fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing {} column", name))?
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Invalid {} type", name))
}

fn optional_value(array: &StringArray, row: usize) -> Option<&str> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

#[async_trait::async_trait]
impl VectorStore for LanceVectorStore {
    fn backend_name(&self) -> &'static str {
        "lancedb"
    }

    async fn connect(&self) -> Result<()> {
        let mut slot = self.connection.write().await;
        if slot.is_some() {
            return Ok(());
        }

        tracing::info!("Connecting to LanceDB at: {}", self.db_path);
        let connection = lancedb::connect(&self.db_path)
            .execute()
            .await
            .map_err(|e| StorageError::unavailable("lancedb", e))?;

        let table_names = connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        if table_names.contains(&self.table_name) {
            tracing::info!("Table '{}' already exists", self.table_name);
        } else {
            let schema = Self::create_schema(self.dimension);
            let empty_batch = RecordBatch::new_empty(schema.clone());
            let batches =
                RecordBatchIterator::new(vec![empty_batch].into_iter().map(Ok), schema.clone());

            connection
                .create_table(&self.table_name, Box::new(batches))
                .execute()
                .await
                .context("Failed to create table")?;
            tracing::info!(
                "Created table '{}' with dimension {}",
                self.table_name,
                self.dimension
            );
        }

        *slot = Some(connection);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // LanceDB persists on every write
        self.connection.write().await.take();
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

        let table = self.get_table().await?;
        let batch = self.create_record_batch(id, vector, payload)?;
        let schema = batch.schema();

        table
            .delete(&format!("id = '{}'", escape(id)))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);
        table
            .add(Box::new(batches))
            .execute()
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
        let table = self.get_table().await?;
        if table.count_rows(None).await.context("Failed to count rows")? == 0 {
            return Ok(Vec::new());
        }

        let postfilter = Self::needs_postfilter(filter);
        let fetch = if postfilter {
            limit * OVERFETCH_FACTOR
        } else {
            limit
        };

        let search = table
            .vector_search(query)
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(fetch);

        let stream = match Self::pushdown(filter) {
            Some(predicate) => search
                .only_if(predicate)
                .execute()
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?,
            None => search
                .execute()
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?,
        };

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut hits = Vec::new();
        for batch in &batches {
            let ids = string_column(batch, "id")?;
            let contents = string_column(batch, "content")?;
            let payloads = string_column(batch, "payload_json")?;
            let distances = batch
                .column_by_name("_distance")
                .context("Missing _distance column")?
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("Invalid _distance type")?;

            for i in 0..batch.num_rows() {
                let payload = Self::join_payload(payloads.value(i), optional_value(contents, i))?;
                if !payload_matches(&payload, filter) {
                    continue;
                }
                hits.push(VectorHit {
                    id: ids.value(i).to_string(),
                    score: clamp_score(1.0 - distances.value(i)),
                    payload,
                });
            }
        }

        Ok(finalize_hits(hits, limit, threshold))
    }

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let table = self.get_table().await?;
        let stream = table
            .query()
            .only_if(format!("id = '{}'", escape(id)))
            .limit(1)
            .execute()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to collect query results")?;

        let Some(batch) = batches.into_iter().find(|b| b.num_rows() > 0) else {
            return Ok(None);
        };

        let vectors = batch
            .column_by_name("vector")
            .context("Missing vector column")?
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .context("Invalid vector type")?;
        let values = vectors.value(0);
        let vector = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .context("Invalid vector item type")?
            .values()
            .to_vec();

        let contents = string_column(&batch, "content")?;
        let payloads = string_column(&batch, "payload_json")?;

        Ok(Some(VectorRecord {
            id: string_column(&batch, "id")?.value(0).to_string(),
            vector,
            payload: Self::join_payload(payloads.value(0), optional_value(contents, 0))?,
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let table = self.get_table().await?;
        let predicate = format!("id = '{}'", escape(id));
        let existing = table
            .count_rows(Some(predicate.clone()))
            .await
            .context("Failed to count rows")?;
        if existing == 0 {
            return Ok(false);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        tracing::debug!("Deleted vector {}", id);
        Ok(true)
    }

    async fn count(&self) -> Result<usize> {
        let table = self.get_table().await?;
        table.count_rows(None).await.context("Failed to count rows")
    }

    async fn health_check(&self) -> bool {
        self.get_table().await.is_ok()
    }
}

#[cfg(test)]
mod tests;
