use super::*;
use crate::types::NodeType;
use tempfile::TempDir;

fn node(node_type: NodeType, path: &str) -> Node {
    Node::new(node_type, path, format!("content of {}", path))
}

async fn sqlite_store() -> (TempDir, SqliteGraphStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteGraphStore::new(dir.path().join("graph").join("graph.sqlite"));
    store.connect().await.unwrap();
    (dir, store)
}

/// a -> b -> c evolution chain plus a PART_OF edge to a file
async fn seed_chain(store: &dyn GraphStore) -> (Node, Node, Node, Node) {
    let a = node(NodeType::Idea, "ideas/a");
    let b = node(NodeType::Idea, "ideas/b");
    let c = node(NodeType::Idea, "ideas/c");
    let file = node(NodeType::File, "notes.md");
    for n in [&a, &b, &c, &file] {
        store.create_node(n).await.unwrap();
    }

    store
        .create_edge(&Edge::new(&b.id, &a.id, RelationType::EvolvesFrom))
        .await
        .unwrap();
    store
        .create_edge(&Edge::new(&c.id, &b.id, RelationType::EvolvesFrom))
        .await
        .unwrap();
    store
        .create_edge(&Edge::new(&a.id, &file.id, RelationType::PartOf).with_weight(0.5))
        .await
        .unwrap();
    (a, b, c, file)
}

async fn check_node_roundtrip(store: &dyn GraphStore) {
    let mut original = node(NodeType::Function, "src/a.py#f");
    original.name = Some("f".to_string());
    original.line_start = Some(3);
    original.line_end = Some(9);
    original
        .metadata
        .insert("signature".to_string(), serde_json::json!("def f()"));

    let id = store.create_node(&original).await.unwrap();
    assert_eq!(id, original.id);

    let loaded = store.get_node(&id).await.unwrap().unwrap();
    assert_eq!(loaded.node_type, NodeType::Function);
    assert_eq!(loaded.path, "src/a.py#f");
    assert_eq!(loaded.name.as_deref(), Some("f"));
    assert_eq!(loaded.line_start, Some(3));
    assert_eq!(loaded.metadata["signature"], "def f()");
    assert!(loaded.embedding.is_none());

    assert!(store.get_node("missing").await.unwrap().is_none());
}

async fn check_upsert_is_idempotent(store: &dyn GraphStore) {
    let mut n = node(NodeType::File, "a.py");
    store.create_node(&n).await.unwrap();
    store.create_node(&n).await.unwrap();
    assert_eq!(store.count_nodes().await.unwrap(), 1);

    n.content = "changed".to_string();
    store.update_node(&n).await.unwrap();
    let loaded = store.get_node(&n.id).await.unwrap().unwrap();
    assert_eq!(loaded.content, "changed");
    assert_eq!(store.count_nodes().await.unwrap(), 1);

    let edge = Edge::new(&n.id, &n.id, RelationType::References);
    store.create_edge(&edge).await.unwrap();
    store.create_edge(&edge).await.unwrap();
    assert_eq!(store.count_edges().await.unwrap(), 1);
}

async fn check_edge_keeps_first_created_at(store: &dyn GraphStore) {
    let a = node(NodeType::Section, "README.md#A");
    let b = node(NodeType::File, "README.md");
    store.create_node(&a).await.unwrap();
    store.create_node(&b).await.unwrap();

    let first = Edge::new(&a.id, &b.id, RelationType::PartOf);
    store.create_edge(&first).await.unwrap();
    let stored = store.get_edges(&a.id, None, Direction::Out).await.unwrap();
    let original = stored[0].created_at;

    let mut again = Edge::new(&a.id, &b.id, RelationType::PartOf).with_weight(0.25);
    again.created_at = original + chrono::Duration::hours(1);
    store.create_edge(&again).await.unwrap();

    let edges = store.get_edges(&a.id, None, Direction::Out).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].created_at, original);
    assert!((edges[0].weight - 0.25).abs() < f32::EPSILON);
}

async fn check_cascade_delete(store: &dyn GraphStore) {
    let (a, b, _c, _file) = seed_chain(store).await;
    assert_eq!(store.count_edges().await.unwrap(), 3);

    assert!(store.delete_node(&a.id).await.unwrap());
    assert!(store.get_node(&a.id).await.unwrap().is_none());
    // b -> a and a -> file are gone, c -> b stays
    assert_eq!(store.count_edges().await.unwrap(), 1);
    assert!(
        store
            .get_edges(&b.id, None, Direction::Out)
            .await
            .unwrap()
            .is_empty()
    );

    assert!(!store.delete_node(&a.id).await.unwrap());
}

async fn check_edge_directions(store: &dyn GraphStore) {
    let (a, b, _c, file) = seed_chain(store).await;

    let out = store.get_edges(&a.id, None, Direction::Out).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to_id, file.id);
    assert_eq!(out[0].weight, 0.5);

    let incoming = store.get_edges(&a.id, None, Direction::In).await.unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from_id, b.id);

    let both = store.get_edges(&a.id, None, Direction::Both).await.unwrap();
    assert_eq!(both.len(), 2);

    let only_part_of = store
        .get_edges(&a.id, Some(&[RelationType::PartOf]), Direction::Both)
        .await
        .unwrap();
    assert_eq!(only_part_of.len(), 1);
    assert_eq!(only_part_of[0].relation, RelationType::PartOf);

    let edge_id = only_part_of[0].id.clone();
    assert!(store.delete_edge(&edge_id).await.unwrap());
    assert!(!store.delete_edge(&edge_id).await.unwrap());
}

async fn check_neighbors(store: &dyn GraphStore) {
    let (a, b, c, file) = seed_chain(store).await;

    let one_hop = store.get_neighbors(&a.id, None, 1).await.unwrap();
    let mut ids: Vec<&str> = one_hop.iter().map(|n| n.id.as_str()).collect();
    ids.sort();
    let mut expected = vec![b.id.as_str(), file.id.as_str()];
    expected.sort();
    assert_eq!(ids, expected);

    let two_hops = store.get_neighbors(&a.id, None, 2).await.unwrap();
    assert_eq!(two_hops.len(), 3);
    assert!(two_hops.iter().any(|n| n.id == c.id));
    assert!(two_hops.iter().all(|n| n.id != a.id));

    let filtered = store
        .get_neighbors(&a.id, Some(&[RelationType::EvolvesFrom]), 5)
        .await
        .unwrap();
    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|n| n.id != file.id));
}

async fn check_trace(store: &dyn GraphStore) {
    let (a, b, c, _file) = seed_chain(store).await;

    // c EVOLVES_FROM b EVOLVES_FROM a: forward from c walks back in history
    let path = store
        .trace_path(&c.id, &[RelationType::EvolvesFrom], TraceDirection::Forward, 10)
        .await
        .unwrap();
    let ids: Vec<&str> = path.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec![c.id.as_str(), b.id.as_str(), a.id.as_str()]);

    let backward = store
        .trace_path(&a.id, &[RelationType::EvolvesFrom], TraceDirection::Backward, 10)
        .await
        .unwrap();
    let ids: Vec<&str> = backward.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);

    let capped = store
        .trace_path(&a.id, &[RelationType::EvolvesFrom], TraceDirection::Backward, 2)
        .await
        .unwrap();
    assert_eq!(capped.len(), 2);

    let missing = store
        .trace_path("nope", &[], TraceDirection::Both, 5)
        .await
        .unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_sqlite_node_roundtrip() {
    let (_dir, store) = sqlite_store().await;
    check_node_roundtrip(&store).await;
}

#[tokio::test]
async fn test_sqlite_upsert_is_idempotent() {
    let (_dir, store) = sqlite_store().await;
    check_upsert_is_idempotent(&store).await;
}

#[tokio::test]
async fn test_sqlite_edge_keeps_first_created_at() {
    let (_dir, store) = sqlite_store().await;
    check_edge_keeps_first_created_at(&store).await;
}

#[tokio::test]
async fn test_sqlite_cascade_delete() {
    let (_dir, store) = sqlite_store().await;
    check_cascade_delete(&store).await;
}

#[tokio::test]
async fn test_sqlite_edge_directions() {
    let (_dir, store) = sqlite_store().await;
    check_edge_directions(&store).await;
}

#[tokio::test]
async fn test_sqlite_neighbors() {
    let (_dir, store) = sqlite_store().await;
    check_neighbors(&store).await;
}

#[tokio::test]
async fn test_sqlite_trace() {
    let (_dir, store) = sqlite_store().await;
    check_trace(&store).await;
}

#[tokio::test]
async fn test_sqlite_connect_and_close_are_idempotent() {
    let (dir, store) = sqlite_store().await;
    store.connect().await.unwrap();
    assert!(store.health_check().await);

    store.close().await.unwrap();
    store.close().await.unwrap();
    assert!(!store.health_check().await);

    let err = store.get_node("x").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::NotConnected(_))
    ));

    let reopened = SqliteGraphStore::new(dir.path().join("graph").join("graph.sqlite"));
    reopened.connect().await.unwrap();
    assert_eq!(reopened.count_nodes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_sqlite_edges_may_precede_nodes() {
    let (_dir, store) = sqlite_store().await;
    let edge = Edge::new("not-yet-a", "not-yet-b", RelationType::Calls);
    store.create_edge(&edge).await.unwrap();
    assert_eq!(store.count_edges().await.unwrap(), 1);
    // traversal skips the dangling endpoint
    assert!(
        store
            .get_neighbors("not-yet-a", None, 1)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_sqlite_persists_across_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graph.sqlite");
    let n = node(NodeType::File, "kept.rs");
    {
        let store = SqliteGraphStore::new(&path);
        store.connect().await.unwrap();
        store.create_node(&n).await.unwrap();
        store.close().await.unwrap();
    }
    let store = SqliteGraphStore::new(&path);
    store.connect().await.unwrap();
    assert!(store.get_node(&n.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_create_graph_store_rejects_unknown_backend() {
    let config = GraphDbConfig {
        backend: "neo4j".to_string(),
        ..Default::default()
    };
    let err = create_graph_store(&config).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<StorageError>(),
        Some(StorageError::BackendUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_create_graph_store_sqlite() {
    let dir = TempDir::new().unwrap();
    let config = GraphDbConfig {
        backend: "sqlite".to_string(),
        sqlite_path: dir.path().join("g.sqlite"),
        ..Default::default()
    };
    let store = create_graph_store(&config).await.unwrap();
    assert_eq!(store.backend_name(), "sqlite");
    assert!(store.health_check().await);
}

#[cfg(feature = "surrealdb-backend")]
mod surreal {
    use super::*;

    async fn surreal_store() -> SurrealGraphStore {
        let config = GraphDbConfig {
            backend: "surrealdb".to_string(),
            surreal_url: "mem://".to_string(),
            ..Default::default()
        };
        let store = SurrealGraphStore::new(&config);
        store.connect().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_surreal_node_roundtrip() {
        check_node_roundtrip(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_upsert_is_idempotent() {
        check_upsert_is_idempotent(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_edge_keeps_first_created_at() {
        check_edge_keeps_first_created_at(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_cascade_delete() {
        check_cascade_delete(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_edge_directions() {
        check_edge_directions(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_neighbors() {
        check_neighbors(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_trace() {
        check_trace(&surreal_store().await).await;
    }

    #[tokio::test]
    async fn test_surreal_edge_requires_endpoints() {
        let store = surreal_store().await;
        let edge = Edge::new("ghost-a", "ghost-b", RelationType::Calls);
        let err = store.create_edge(&edge).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::NotFound { .. })
        ));
    }
}
