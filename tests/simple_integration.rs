/// Integration tests against the real embedding model and the embedded backends
use anyhow::Result;
use repo_graph::config::Config;
use repo_graph::mcp_server::RepoGraphServer;
use repo_graph::{JobStatus, KnowledgeGraph, NodeType, QueryRequest, SyncState};
use std::time::Duration;
use tempfile::TempDir;

fn embedded_config(db_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.graph_db.backend = "sqlite".to_string();
    config.graph_db.sqlite_path = db_dir.path().join("graph.sqlite");
    config.vector_db.backend = "lancedb".to_string();
    config.vector_db.lancedb_path = db_dir.path().join("lancedb");
    config.indexing.poll_interval_ms = 50;
    config
}

#[tokio::test]
async fn test_server_creation_with_config() -> Result<()> {
    let db_dir = TempDir::new()?;

    let graph = KnowledgeGraph::with_config(embedded_config(&db_dir)).await?;
    let server = RepoGraphServer::with_graph(graph.clone());

    // Verify server was created successfully
    assert!(std::mem::size_of_val(&server) > 0);
    assert!(graph.health().await.healthy);

    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_config_with_custom_batch_size() -> Result<()> {
    let db_dir = TempDir::new()?;

    let mut config = embedded_config(&db_dir);
    config.embedding.batch_size = 64;
    config.embedding.timeout_secs = 60;

    let graph = KnowledgeGraph::with_config(config).await?;
    assert_eq!(graph.config().embedding.batch_size, 64);

    Ok(())
}

#[tokio::test]
async fn test_full_indexing_workflow() -> Result<()> {
    let repo_dir = TempDir::new()?;
    let db_dir = TempDir::new()?;

    std::fs::write(
        repo_dir.path().join("a.py"),
        "def f():\n    \"\"\"Return one.\"\"\"\n    return 1\n",
    )?;
    std::fs::write(
        repo_dir.path().join("README.md"),
        "# Section\n\nThis project explains how caching works.\n",
    )?;

    let graph = KnowledgeGraph::with_config(embedded_config(&db_dir)).await?;
    let queued = graph
        .index_repository(&repo_dir.path().to_string_lossy(), false)
        .await?;

    let mut job = graph.job_status(&queued.job_id).await?;
    for _ in 0..600 {
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        job = graph.job_status(&queued.job_id).await?;
    }
    assert_eq!(job.status, JobStatus::Completed);

    let repo = repo_dir
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    let status = graph.sync_status(&repo).await;
    assert_eq!(status.status, SyncState::Synced);
    assert_eq!(status.nodes_count, 4);
    assert!(status.edges_count >= 2);

    let mut request = QueryRequest::new("def f return 1");
    request.min_score = Some(0.0);
    request.node_types = vec!["FUNCTION".to_string(), "SECTION".to_string()];
    request.include_context = false;
    let response = graph.query(request).await?;
    assert_eq!(response.count, 2);
    assert_eq!(response.results[0].node.node_type, NodeType::Function);

    graph.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_nonexistent_repository_fails_job() -> Result<()> {
    let db_dir = TempDir::new()?;
    let graph = KnowledgeGraph::with_config(embedded_config(&db_dir)).await?;

    let queued = graph
        .index_repository("/nonexistent/path/12345", false)
        .await?;

    let mut job = graph.job_status(&queued.job_id).await?;
    for _ in 0..100 {
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        job = graph.job_status(&queued.job_id).await?;
    }
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());

    Ok(())
}
