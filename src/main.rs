use anyhow::Result;
use repo_graph::mcp_server::RepoGraphServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP transport, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        graph_backends = env!("GRAPH_DB_BACKEND"),
        vector_backends = env!("VECTOR_DB_BACKEND"),
        "repo-graph starting"
    );

    RepoGraphServer::serve_stdio().await?;

    Ok(())
}
