//! Indexing service: an in-memory job queue drained by one background worker.
//!
//! Each job walks a repository, parses every file a parser claims and writes
//! files, entities and their structural edges through the [`StorageCoordinator`].
//! Jobs and sync records are kept in memory only and are lost on restart.

pub mod walker;

pub use walker::{IGNORED_DIRS, SourceFile};

use crate::config::IndexingConfig;
use crate::error::IndexingError;
use crate::parsers::{EntityKind, ParseResult, ParsedEntity, ParserRegistry, file_name};
use crate::storage::StorageCoordinator;
use crate::types::{
    IndexJob, JobStatus, Metadata, NodeType, QueueStats, RelationType, SyncState, SyncStatus,
};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use globset::GlobSet;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bail out of a pass once the worker has been asked to stop
macro_rules! check_cancelled {
    ($cancel_token:expr) => {
        if $cancel_token.is_cancelled() {
            tracing::info!("Indexing operation cancelled");
            anyhow::bail!("Indexing was cancelled");
        }
    };
}

/// Repository identifier used for sync records: the directory name
pub fn repo_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Jobs in submission order
#[derive(Default)]
struct JobTable {
    order: Vec<String>,
    jobs: HashMap<String, IndexJob>,
}

impl JobTable {
    fn next_pending(&self) -> Option<&str> {
        self.order
            .iter()
            .find(|id| {
                self.jobs
                    .get(id.as_str())
                    .is_some_and(|j| j.status == JobStatus::Pending)
            })
            .map(String::as_str)
    }
}

/// Counters and per-file errors collected during one pass
#[derive(Debug, Default)]
struct PassReport {
    nodes: usize,
    edges: usize,
    files: usize,
    errors: Vec<String>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    storage: Arc<StorageCoordinator>,
    parsers: ParserRegistry,
    config: IndexingConfig,
    excludes: Arc<GlobSet>,
    jobs: RwLock<JobTable>,
    sync: RwLock<HashMap<String, SyncStatus>>,
    wake: Notify,
}

/// Queue front-end plus the single background worker
#[derive(Clone)]
pub struct IndexingService {
    inner: Arc<Inner>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl IndexingService {
    pub fn new(storage: Arc<StorageCoordinator>, config: IndexingConfig) -> Result<Self> {
        Self::with_parsers(storage, config, ParserRegistry::default())
    }

    pub fn with_parsers(
        storage: Arc<StorageCoordinator>,
        config: IndexingConfig,
        parsers: ParserRegistry,
    ) -> Result<Self> {
        let excludes = Arc::new(walker::compile_excludes(&config.exclude_patterns)?);
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                parsers,
                config,
                excludes,
                jobs: RwLock::new(JobTable::default()),
                sync: RwLock::new(HashMap::new()),
                wake: Notify::new(),
            }),
            worker: Arc::new(Mutex::new(None)),
        })
    }

    /// Spawn the worker; a no-op when one is already running
    pub async fn start_worker(&self) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });
        *worker = Some(Worker { cancel, handle });
        tracing::info!("Indexing worker started");
    }

    /// Stop the worker and wait for it. A job in flight fails as cancelled.
    pub async fn stop_worker(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            tracing::error!("Indexing worker ended abnormally: {}", e);
        }
        tracing::info!("Indexing worker stopped");
    }

    pub async fn is_worker_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Enqueue a pass over `path` and return the job id
    pub async fn queue_index(&self, path: &str, force: bool) -> String {
        let job = IndexJob::new(path, force);
        let id = job.id.clone();
        {
            let mut table = self.inner.jobs.write().await;
            table.order.push(id.clone());
            table.jobs.insert(id.clone(), job);
        }
        tracing::info!("Queued index job {} for {} (force: {})", id, path, force);
        self.inner.wake.notify_one();
        id
    }

    /// Snapshot of a job, `None` for unknown ids
    pub async fn get_job_status(&self, job_id: &str) -> Option<IndexJob> {
        self.inner.jobs.read().await.jobs.get(job_id).cloned()
    }

    /// Last sync record for `repo`, or an `unknown` record if it was never indexed
    pub async fn get_sync_status(&self, repo: &str) -> SyncStatus {
        self.inner
            .sync
            .read()
            .await
            .get(repo)
            .cloned()
            .unwrap_or_else(|| SyncStatus::unknown(repo))
    }

    pub async fn force_sync(&self, path: &str) -> String {
        self.queue_index(path, true).await
    }

    /// Forget the sync record for `repo`. Indexed nodes are left in the stores.
    pub async fn remove_repo(&self, repo: &str) -> bool {
        let removed = self.inner.sync.write().await.remove(repo).is_some();
        if removed {
            tracing::info!("Removed sync status for {}", repo);
        }
        removed
    }

    pub async fn queue_stats(&self) -> QueueStats {
        let table = self.inner.jobs.read().await;
        let mut stats = QueueStats::default();
        for job in table.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Run every pending job on the calling task, oldest first
    pub async fn drain(&self) -> usize {
        let token = CancellationToken::new();
        let mut processed = 0;
        while let Some(id) = self.inner.claim_next().await {
            self.inner.run_job(&id, &token).await;
            processed += 1;
        }
        processed
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.claim_next().await {
                Some(id) => self.run_job(&id, &cancel).await,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
    }

    /// Mark the oldest pending job running and return its id
    async fn claim_next(&self) -> Option<String> {
        let mut table = self.jobs.write().await;
        let id = table.next_pending()?.to_string();
        if let Some(job) = table.jobs.get_mut(&id) {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        }
        Some(id)
    }

    async fn run_job(&self, id: &str, cancel: &CancellationToken) {
        let Some(repo_path) = self
            .jobs
            .read()
            .await
            .jobs
            .get(id)
            .map(|j| j.repo_path.clone())
        else {
            return;
        };
        let root = PathBuf::from(&repo_path);
        let repo = repo_name(&root);
        tracing::info!("Starting index job {} for {}", id, repo_path);

        let mut status = SyncStatus::unknown(&repo);
        status.status = SyncState::Running;
        self.sync.write().await.insert(repo.clone(), status);

        let started = Instant::now();
        let mut report = PassReport::default();
        let outcome = self.index_repository(&root, &mut report, cancel).await;

        let now = Utc::now();
        let mut status = SyncStatus::unknown(&repo);
        status.last_sync = Some(now);
        status.nodes_count = report.nodes;
        status.edges_count = report.edges;

        let error = match outcome {
            Ok(()) => {
                tracing::info!(
                    "Indexed {}: {} files, {} nodes, {} edges, {} errors in {:?}",
                    repo,
                    report.files,
                    report.nodes,
                    report.edges,
                    report.errors.len(),
                    started.elapsed()
                );
                status.status = SyncState::Synced;
                None
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!("Index job {} failed: {}", id, message);
                status.status = SyncState::Failed;
                status.error = Some(message.clone());
                Some(message)
            }
        };
        self.sync.write().await.insert(repo, status);

        let mut table = self.jobs.write().await;
        if let Some(job) = table.jobs.get_mut(id) {
            job.status = if error.is_some() {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            job.error = error;
            job.completed_at = Some(now);
            job.nodes_count = report.nodes;
            job.edges_count = report.edges;
            job.errors = report.errors;
        }
    }

    async fn index_repository(
        &self,
        root: &Path,
        report: &mut PassReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !root.exists() {
            return Err(IndexingError::RepositoryNotFound(root.display().to_string()).into());
        }
        if !root.is_dir() {
            return Err(IndexingError::NotADirectory(root.display().to_string()).into());
        }

        let walked = tokio::task::spawn_blocking({
            let root = root.to_path_buf();
            let excludes = Arc::clone(&self.excludes);
            let parsers = self.parsers.clone();
            move || walker::collect_files(&root, excludes, &parsers)
        })
        .await
        .context("File walk task panicked")?;
        report.errors.extend(walked.errors);
        let files = walked.files;

        check_cancelled!(cancel);

        let repo = repo_name(root);
        let max_size = self.config.max_file_size;
        let timeout = Duration::from_secs(self.config.parse_timeout_secs);
        let mut parsed = stream::iter(files)
            .map(|file| parse_file(file, max_size, timeout))
            .buffered(self.config.parse_concurrency.max(1));

        while let Some((file, outcome)) = parsed.next().await {
            check_cancelled!(cancel);
            match outcome {
                Ok((content, result)) => {
                    for error in &result.errors {
                        tracing::warn!("Parse error in {}: {}", file.relative, error);
                        report.errors.push(format!("{}: {}", file.relative, error));
                    }
                    self.write_file(&repo, &file, &content, &result, report)
                        .await?;
                    report.files += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {:#}", file.relative, e);
                    report.errors.push(format!("{}: {:#}", file.relative, e));
                }
            }
        }

        Ok(())
    }

    /// FILE node first, then entity nodes, then the edges between them
    async fn write_file(
        &self,
        repo: &str,
        file: &SourceFile,
        content: &str,
        result: &ParseResult,
        report: &mut PassReport,
    ) -> Result<()> {
        let storage = &self.storage;

        let mut file_meta = Metadata::new();
        file_meta.insert("name".into(), json!(file_name(&file.relative)));
        file_meta.insert("language".into(), json!(result.language));
        file_meta.insert("full_path".into(), json!(file.path.to_string_lossy()));
        file_meta.insert("imports".into(), json!(result.imports));
        file_meta.insert("repo".into(), json!(repo));

        let preview = truncate_chars(content, self.config.preview_chars);
        let file_id = storage
            .store_node(preview, NodeType::File, &file.relative, file_meta, None)
            .await?;
        report.nodes += 1;

        let paths = entity_paths(&file.relative, &result.entities);
        let mut ids = Vec::with_capacity(result.entities.len());
        for (entity, path) in result.entities.iter().zip(&paths) {
            let mut metadata = entity_metadata(entity, &result.language);
            metadata.insert("repo".into(), json!(repo));
            let id = storage
                .store_node(&entity.content, entity.kind.node_type(), path, metadata, None)
                .await?;
            report.nodes += 1;

            storage
                .create_edge(&id, &file_id, RelationType::PartOf, 1.0, Metadata::new())
                .await?;
            report.edges += 1;
            ids.push(id);
        }

        let lookup = |kinds: &[EntityKind], name: &str| {
            result
                .entities
                .iter()
                .position(|e| kinds.contains(&e.kind) && e.name == name)
                .map(|i| ids[i].as_str())
        };
        // nearest enclosing entity: the closest earlier one with that name
        let enclosing = |index: usize, kind: EntityKind, name: &str| {
            result.entities[..index]
                .iter()
                .rposition(|e| e.kind == kind && e.name == name)
                .map(|i| ids[i].as_str())
        };

        for (index, (entity, id)) in result.entities.iter().zip(&ids).enumerate() {
            let parent = match (entity.kind, entity.parent.as_deref()) {
                (EntityKind::Section, Some(parent)) => {
                    enclosing(index, EntityKind::Section, parent)
                }
                (EntityKind::Method, Some(parent)) => enclosing(index, EntityKind::Class, parent),
                _ => None,
            };
            if let Some(parent_id) = parent {
                storage
                    .create_edge(id, parent_id, RelationType::PartOf, 1.0, Metadata::new())
                    .await?;
                report.edges += 1;
            }

            for callee in &entity.calls {
                let Some(target) =
                    lookup(&[EntityKind::Function, EntityKind::Method], callee)
                else {
                    continue;
                };
                if target == id.as_str() {
                    continue;
                }
                storage
                    .create_edge(id, target, RelationType::Calls, 1.0, Metadata::new())
                    .await?;
                report.edges += 1;
            }
        }

        tracing::debug!(
            "Wrote {} with {} entities",
            file.relative,
            result.entities.len()
        );
        Ok(())
    }
}

/// Node path for each entity of a file: `file#qualified_name`, with `@L<line>`
/// appended when that name was already taken earlier in the file
fn entity_paths(relative: &str, entities: &[ParsedEntity]) -> Vec<String> {
    let mut taken = HashSet::new();
    entities
        .iter()
        .enumerate()
        .map(|(i, entity)| {
            let base = format!("{}#{}", relative, entity.qualified_name());
            let candidates = [
                base.clone(),
                format!("{}@L{}", base, entity.line_start),
                format!("{}@L{}.{}", base, entity.line_start, i),
            ];
            let path = candidates
                .iter()
                .find(|p| !taken.contains(*p))
                .cloned()
                .unwrap_or_else(|| candidates[2].clone());
            taken.insert(path.clone());
            path
        })
        .collect()
}

type ParseOutcome = Result<(String, ParseResult)>;

/// Read and parse one file on the blocking pool under the size and time guards
async fn parse_file(file: SourceFile, max_size: u64, timeout: Duration) -> (SourceFile, ParseOutcome) {
    let task = tokio::task::spawn_blocking({
        let file = file.clone();
        move || -> ParseOutcome {
            let size = std::fs::metadata(&file.path)
                .map_err(|e| IndexingError::FileReadFailed {
                    file: file.relative.clone(),
                    reason: e.to_string(),
                })?
                .len();
            if size > max_size {
                return Err(IndexingError::FileTooLarge {
                    size,
                    max: max_size,
                }
                .into());
            }

            let bytes = std::fs::read(&file.path).map_err(|e| IndexingError::FileReadFailed {
                file: file.relative.clone(),
                reason: e.to_string(),
            })?;
            let content = String::from_utf8_lossy(&bytes).into_owned();
            let result = file.parser.parse(&content, &file.relative);
            Ok((content, result))
        }
    });

    let outcome = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => Err(anyhow::anyhow!("Parser panicked: {}", e)),
        Err(_) => Err(IndexingError::ParseTimeout {
            file: file.relative.clone(),
            secs: timeout.as_secs(),
        }
        .into()),
    };
    (file, outcome)
}

/// Metadata stored on an entity node; parser-specific keys first, standard keys win
fn entity_metadata(entity: &ParsedEntity, language: &str) -> Metadata {
    let mut metadata = entity.metadata.clone();
    metadata.insert("name".into(), json!(entity.name));
    metadata.insert("language".into(), json!(language));
    metadata.insert("line_start".into(), json!(entity.line_start));
    metadata.insert("line_end".into(), json!(entity.line_end));
    metadata.insert("docstring".into(), json!(entity.docstring));
    metadata.insert("signature".into(), json!(entity.signature));
    metadata.insert("parent".into(), json!(entity.parent));
    metadata.insert("children".into(), json!(entity.children));
    metadata.insert("calls".into(), json!(entity.calls));
    metadata
}

/// At most `max_chars` characters of `text`, cut on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
