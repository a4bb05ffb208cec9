use super::*;
use serde_json::json;
use tempfile::TempDir;

const DIM: usize = 4;

async fn open_store(temp_dir: &TempDir) -> LanceVectorStore {
    let db_path = temp_dir
        .path()
        .join("lancedb")
        .to_string_lossy()
        .to_string();
    let store = LanceVectorStore::new(&db_path, "repo_nodes", DIM);
    store.connect().await.unwrap();
    store
}

fn payload(node_type: &str, path: &str, content: &str) -> Metadata {
    let mut payload = Metadata::new();
    payload.insert("node_type".to_string(), json!(node_type));
    payload.insert("path".to_string(), json!(path));
    payload.insert("content".to_string(), json!(content));
    payload
}

#[tokio::test]
async fn test_connect_creates_table() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    let connection = store.connection.read().await.clone().unwrap();
    let table_names = connection.table_names().execute().await.unwrap();
    assert!(table_names.contains(&"repo_nodes".to_string()));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_connect_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;
    assert!(store.connect().await.is_ok());
    assert!(store.health_check().await);
}

#[tokio::test]
async fn test_default_path() {
    let path = LanceVectorStore::default_lancedb_path();
    assert!(path.contains("repo-graph"));
    assert!(path.contains("lancedb"));
}

#[tokio::test]
async fn test_not_connected() {
    let store = LanceVectorStore::new("/nonexistent/lancedb", "t", DIM);
    assert!(!store.health_check().await);
    let err = store.count().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_store_and_get_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    let mut original = payload("FUNCTION", "a.py#f", "def f(): pass");
    original.insert("language".to_string(), json!("python"));
    original.insert("line_start".to_string(), json!(3));
    original.insert("tags".to_string(), json!(["x", "y"]));

    store
        .store("n1", vec![1.0, 0.0, 0.0, 0.0], original.clone())
        .await
        .unwrap();

    let record = store.get("n1").await.unwrap().unwrap();
    assert_eq!(record.id, "n1");
    assert_eq!(record.vector, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(record.payload, original);

    assert!(store.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_non_string_content_roundtrips() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    let mut original = Metadata::new();
    original.insert("content".to_string(), json!({"nested": true}));
    store
        .store("n1", vec![0.0, 1.0, 0.0, 0.0], original.clone())
        .await
        .unwrap();

    assert_eq!(store.get("n1").await.unwrap().unwrap().payload, original);
}

#[tokio::test]
async fn test_store_is_upsert() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    store
        .store("n1", vec![1.0, 0.0, 0.0, 0.0], payload("FILE", "a.py", "old"))
        .await
        .unwrap();
    store
        .store("n1", vec![0.0, 1.0, 0.0, 0.0], payload("FILE", "a.py", "new"))
        .await
        .unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let record = store.get("n1").await.unwrap().unwrap();
    assert_eq!(record.payload["content"], "new");
    assert_eq!(record.vector, vec![0.0, 1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_store_rejects_wrong_dimension() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    let err = store
        .store("n1", vec![1.0, 0.0], Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EmbeddingError>(),
        Some(EmbeddingError::DimensionMismatch {
            expected: 4,
            actual: 2
        })
    ));
}

#[tokio::test]
async fn test_search_empty_table() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;
    let hits = store
        .search(vec![1.0, 0.0, 0.0, 0.0], 10, 0.0, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_search_scores_are_normalized_and_sorted() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    store
        .store("same", vec![1.0, 0.0, 0.0, 0.0], payload("FILE", "a", "a"))
        .await
        .unwrap();
    store
        .store("close", vec![1.0, 1.0, 0.0, 0.0], payload("FILE", "b", "b"))
        .await
        .unwrap();
    store
        .store("orthogonal", vec![0.0, 0.0, 1.0, 0.0], payload("FILE", "c", "c"))
        .await
        .unwrap();
    store
        .store("opposite", vec![-1.0, 0.0, 0.0, 0.0], payload("FILE", "d", "d"))
        .await
        .unwrap();

    let hits = store
        .search(vec![1.0, 0.0, 0.0, 0.0], 10, 0.0, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 4);
    assert_eq!(hits[0].id, "same");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert_eq!(hits[1].id, "close");
    assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(hits[3].score, 0.0);
}

#[tokio::test]
async fn test_search_threshold_and_limit() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    store
        .store("same", vec![1.0, 0.0, 0.0, 0.0], payload("FILE", "a", "a"))
        .await
        .unwrap();
    store
        .store("close", vec![1.0, 1.0, 0.0, 0.0], payload("FILE", "b", "b"))
        .await
        .unwrap();
    store
        .store("orthogonal", vec![0.0, 0.0, 1.0, 0.0], payload("FILE", "c", "c"))
        .await
        .unwrap();

    let query = vec![1.0, 0.0, 0.0, 0.0];
    let above = store.search(query.clone(), 10, 0.5, None).await.unwrap();
    let ids: Vec<&str> = above.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["same", "close"]);

    let limited = store.search(query.clone(), 1, 0.0, None).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, "same");

    assert!(store.search(query, 0, 0.0, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_with_filter() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    let mut python = payload("FUNCTION", "a.py#f", "def f()");
    python.insert("language".to_string(), json!("python"));
    let mut rust = payload("FUNCTION", "b.rs#g", "fn g()");
    rust.insert("language".to_string(), json!("rust"));

    store
        .store("py", vec![1.0, 0.0, 0.0, 0.0], python)
        .await
        .unwrap();
    store
        .store("rs", vec![0.9, 0.1, 0.0, 0.0], rust)
        .await
        .unwrap();
    store
        .store("file", vec![1.0, 0.0, 0.0, 0.0], payload("FILE", "a.py", "x"))
        .await
        .unwrap();

    let query = vec![1.0, 0.0, 0.0, 0.0];

    // column pushdown
    let mut by_type = PayloadFilter::new();
    by_type.insert("node_type".to_string(), json!("FUNCTION"));
    let hits = store.search(query.clone(), 10, 0.0, Some(&by_type)).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.payload["node_type"] == "FUNCTION"));

    // payload post-filter
    let mut by_language = PayloadFilter::new();
    by_language.insert("language".to_string(), json!("rust"));
    let hits = store
        .search(query, 10, 0.0, Some(&by_language))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "rs");
}

#[tokio::test]
async fn test_delete() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    store
        .store("n1", vec![1.0, 0.0, 0.0, 0.0], payload("FILE", "a", "a"))
        .await
        .unwrap();
    store
        .store("n2", vec![0.0, 1.0, 0.0, 0.0], payload("FILE", "b", "b"))
        .await
        .unwrap();

    assert!(store.delete("n1").await.unwrap());
    assert!(!store.delete("n1").await.unwrap());
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(store.get("n1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ids_with_quotes() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir).await;

    store
        .store("it's", vec![1.0, 0.0, 0.0, 0.0], payload("FILE", "o'neil.py", "x"))
        .await
        .unwrap();
    assert!(store.get("it's").await.unwrap().is_some());

    let mut filter = PayloadFilter::new();
    filter.insert("path".to_string(), json!("o'neil.py"));
    let hits = store
        .search(vec![1.0, 0.0, 0.0, 0.0], 5, 0.0, Some(&filter))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_create_schema() {
    let schema = LanceVectorStore::create_schema(DIM);
    assert_eq!(schema.fields().len(), 6);
    assert_eq!(schema.field(0).name(), "vector");
    assert!(schema.field_with_name("payload_json").is_ok());
}

#[test]
fn test_pushdown_predicate() {
    let mut filter = PayloadFilter::new();
    assert_eq!(LanceVectorStore::pushdown(None), None);
    assert_eq!(LanceVectorStore::pushdown(Some(&filter)), None);

    filter.insert("node_type".to_string(), json!("CLASS"));
    filter.insert("language".to_string(), json!("go"));
    assert_eq!(
        LanceVectorStore::pushdown(Some(&filter)).as_deref(),
        Some("node_type = 'CLASS'")
    );
    assert!(LanceVectorStore::needs_postfilter(Some(&filter)));

    filter.remove("language");
    assert!(!LanceVectorStore::needs_postfilter(Some(&filter)));
}
