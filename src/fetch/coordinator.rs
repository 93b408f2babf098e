//! Fetch coordinator / 索引拉取协调器
//!
//! On a cache miss: HEAD the object, then run the downloader and the
//! extractor concurrently over one bounded pipe, extracting into a staging
//! directory that is renamed onto the destination root only on success.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;

use super::downloader::download;
use super::error::{FetchError, Stage};
use super::extract::{extract_archive, ExtractStats};
use super::gate::FetchGate;
use super::pipe::pipe;
use super::probe::probe;
use super::timings::StageTimings;
use crate::storage::{ObjectStore, RemoteObjectRef};

/// Time budgets / 超时预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// HEAD request budget
    pub head: Duration,
    /// Whole download + extract budget
    pub fetch: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            head: Duration::from_secs(1),
            fetch: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub deadlines: Deadlines,
    /// Chunks buffered between downloader and extractor / 管道容量（块数）
    pub pipe_chunks: usize,
    /// HEAD the object before downloading / 下载前先 HEAD
    pub verify_head: bool,
    /// How long a cancelled task may take to stop / 取消后的等待上限
    pub grace: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            deadlines: Deadlines::default(),
            pipe_chunks: 16,
            verify_head: true,
            grace: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub cache_hit: bool,
    pub bytes_downloaded: u64,
    pub entries_extracted: u64,
}

impl FetchReport {
    fn hit() -> Self {
        Self {
            cache_hit: true,
            ..Default::default()
        }
    }
}

/// Result of one `ensure_index_available` call / 拉取结果
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Success(FetchReport),
    Failure(FetchError),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<FetchReport, FetchError> {
        match self {
            PipelineOutcome::Success(report) => Ok(report),
            PipelineOutcome::Failure(err) => Err(err),
        }
    }
}

type Flight = (PipelineOutcome, StageTimings);

/// Counts live pipeline tasks / 统计存活的流水线任务
#[derive(Clone, Default)]
struct TaskCounter(Arc<AtomicUsize>);

struct TaskGuard(Arc<AtomicUsize>);

impl TaskCounter {
    fn enter(&self) -> TaskGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        TaskGuard(self.0.clone())
    }

    fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct FetchCoordinator {
    store: Arc<dyn ObjectStore>,
    options: FetchOptions,
    gate: FetchGate<Flight>,
    tasks: TaskCounter,
}

impl FetchCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, options: FetchOptions) -> Self {
        Self {
            store,
            options,
            gate: FetchGate::new(),
            tasks: TaskCounter::default(),
        }
    }

    /// Live downloader / extractor tasks / 存活任务数
    pub fn active_tasks(&self) -> usize {
        self.tasks.live()
    }

    /// Fetches currently in flight / 进行中的拉取数
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Make sure `destination_root` holds the extracted index.
    /// 确保目标目录中存在已解压的索引
    pub async fn ensure_index_available(
        &self,
        object: &RemoteObjectRef,
        destination_root: &Path,
        timings: &mut StageTimings,
    ) -> PipelineOutcome {
        let destination_root = flight_key(destination_root);
        let destination_root = destination_root.as_path();
        let state = match timings.time("probeCache", || probe(destination_root)) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Cache probe failed: {}", e);
                return PipelineOutcome::Failure(e);
            }
        };
        if state.present() {
            tracing::info!("Index cache hit at {:?}", destination_root);
            return PipelineOutcome::Success(FetchReport::hit());
        }
        tracing::info!(
            "Index cache miss at {:?} ({:?}), fetching {}",
            destination_root,
            state.status,
            object
        );

        let this = self.clone();
        let object = object.clone();
        let root = destination_root.to_path_buf();
        let flight = self
            .gate
            .run(root.clone(), move || {
                async move {
                    let mut flight_timings = StageTimings::new();
                    let outcome = this.fetch_once(&object, &root, &mut flight_timings).await;
                    (outcome, flight_timings)
                }
                .boxed()
            })
            .await;

        match flight {
            Ok((outcome, flight_timings)) => {
                timings.merge(&flight_timings);
                outcome
            }
            Err(message) => PipelineOutcome::Failure(FetchError::TaskFailed(message)),
        }
    }

    async fn fetch_once(
        &self,
        object: &RemoteObjectRef,
        root: &Path,
        timings: &mut StageTimings,
    ) -> PipelineOutcome {
        // A previous flight may have populated the root while we queued.
        match probe(root) {
            Ok(state) if state.present() => return PipelineOutcome::Success(FetchReport::hit()),
            Ok(_) => {}
            Err(e) => return PipelineOutcome::Failure(e),
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.options.deadlines.fetch;
        let result = self.fetch_into(object, root, deadline, timings).await;
        timings.record_since("fetchIndex", started);

        match result {
            Ok(report) => {
                tracing::info!(
                    "Fetched {} into {:?}: {} bytes, {} entries in {}ms",
                    object,
                    root,
                    report.bytes_downloaded,
                    report.entries_extracted,
                    started.elapsed().as_millis()
                );
                PipelineOutcome::Success(report)
            }
            Err(e) => {
                tracing::error!("Fetching {} failed ({}): {}", object, e.kind(), e);
                PipelineOutcome::Failure(e)
            }
        }
    }

    async fn fetch_into(
        &self,
        object: &RemoteObjectRef,
        root: &Path,
        deadline: tokio::time::Instant,
        timings: &mut StageTimings,
    ) -> Result<FetchReport, FetchError> {
        let expected_size = if self.options.verify_head {
            Some(self.head(object, deadline, timings).await?)
        } else {
            None
        };

        if let Some(parent) = root.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::local_io(parent, &e))?;
        }
        let staging = staging_path(root);

        match self.transfer(object, &staging, deadline, expected_size, timings).await {
            Ok((bytes, stats)) => {
                if let Err(e) = promote(&staging, root).await {
                    remove_staging(&staging).await;
                    return Err(e);
                }
                Ok(FetchReport {
                    cache_hit: false,
                    bytes_downloaded: bytes,
                    entries_extracted: stats.entries,
                })
            }
            Err(e) => {
                remove_staging(&staging).await;
                Err(e)
            }
        }
    }

    async fn head(
        &self,
        object: &RemoteObjectRef,
        deadline: tokio::time::Instant,
        timings: &mut StageTimings,
    ) -> Result<u64, FetchError> {
        let budget = self.options.deadlines.head;
        let head_deadline = deadline.min(tokio::time::Instant::now() + budget);

        let started = Instant::now();
        let result = tokio::time::timeout_at(head_deadline, self.store.head_object(object)).await;
        timings.record_since("headObject", started);

        let meta = match result {
            Err(_) => {
                return Err(FetchError::RemoteTimeout {
                    stage: Stage::Head,
                    after: started.elapsed(),
                })
            }
            Ok(meta) => meta.map_err(|e| FetchError::from_store(e, object))?,
        };
        if !meta.exists {
            return Err(FetchError::RemoteNotFound(object.clone()));
        }
        tracing::debug!("HEAD {}: {} bytes", object, meta.size);
        Ok(meta.size)
    }

    /// Run downloader and extractor over one pipe / 并发下载与解压
    async fn transfer(
        &self,
        object: &RemoteObjectRef,
        staging: &Path,
        deadline: tokio::time::Instant,
        expected_size: Option<u64>,
        timings: &mut StageTimings,
    ) -> Result<(u64, ExtractStats), FetchError> {
        let (writer, reader) = pipe(self.options.pipe_chunks);
        let cancel = CancellationToken::new();

        let mut downloader: JoinHandle<(Result<u64, FetchError>, Duration)> = {
            let store = self.store.clone();
            let object = object.clone();
            let guard = self.tasks.enter();
            tokio::spawn(async move {
                let _guard = guard;
                let started = Instant::now();
                let result = download(store.as_ref(), &object, writer, deadline, expected_size).await;
                (result, started.elapsed())
            })
        };

        let mut extractor: JoinHandle<(Result<ExtractStats, FetchError>, Duration)> = {
            // The bridge must be created inside the runtime.
            let source = SyncIoBridge::new(reader);
            let staging = staging.to_path_buf();
            let cancel = cancel.clone();
            let guard = self.tasks.enter();
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                let started = Instant::now();
                let result = extract_archive(source, &staging, &cancel);
                (result, started.elapsed())
            })
        };

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        let mut downloaded: Option<u64> = None;
        let mut extracted: Option<ExtractStats> = None;
        let mut download_done = false;
        let mut extract_done = false;
        let mut secondary: Option<FetchError> = None;
        let mut failure: Option<FetchError> = None;

        while !(download_done && extract_done) {
            tokio::select! {
                joined = &mut downloader, if !download_done => {
                    download_done = true;
                    match flatten(joined, timings, "download") {
                        Ok(bytes) => downloaded = Some(bytes),
                        Err(e) if e.is_secondary() => secondary = Some(e),
                        Err(e) => failure = Some(e),
                    }
                }
                joined = &mut extractor, if !extract_done => {
                    extract_done = true;
                    match flatten(joined, timings, "extract") {
                        Ok(stats) => extracted = Some(stats),
                        Err(e) if e.is_secondary() => secondary = Some(e),
                        Err(e) => failure = Some(e),
                    }
                }
                _ = &mut expiry => {
                    failure = Some(FetchError::RemoteTimeout {
                        stage: Stage::Fetch,
                        after: self.options.deadlines.fetch,
                    });
                }
            }
            if failure.is_some() {
                break;
            }
        }

        if let Some(err) = failure {
            cancel.cancel();
            downloader.abort();
            self.settle(downloader, download_done, extractor, extract_done, staging)
                .await;
            return Err(err);
        }
        if let Some(err) = secondary {
            return Err(err);
        }
        match (downloaded, extracted) {
            (Some(bytes), Some(stats)) => Ok((bytes, stats)),
            _ => Err(FetchError::TaskFailed("pipeline finished without a result".to_string())),
        }
    }

    /// Wait (bounded) for cancelled tasks to stop / 等待已取消任务退出
    ///
    /// An extractor still running after `grace` owns the staging directory
    /// until it returns, so its removal is handed to a task that waits for it.
    async fn settle(
        &self,
        downloader: JoinHandle<(Result<u64, FetchError>, Duration)>,
        download_done: bool,
        mut extractor: JoinHandle<(Result<ExtractStats, FetchError>, Duration)>,
        extract_done: bool,
        staging: &Path,
    ) {
        let stopped = tokio::time::timeout(self.options.grace, async {
            if !download_done {
                let _ = downloader.await;
            }
            if !extract_done {
                let _ = (&mut extractor).await;
            }
        })
        .await;
        if stopped.is_err() {
            tracing::warn!(
                "Pipeline tasks still running {}ms after cancellation",
                self.options.grace.as_millis()
            );
        }

        if !extract_done && !extractor.is_finished() {
            let staging = staging.to_path_buf();
            tracing::warn!("Extractor still writing into {:?}, removing it once the task stops", staging);
            tokio::spawn(async move {
                let _ = extractor.await;
                remove_staging(&staging).await;
            });
        }
    }
}

fn flatten<T>(
    joined: Result<(Result<T, FetchError>, Duration), JoinError>,
    timings: &mut StageTimings,
    stage: &str,
) -> Result<T, FetchError> {
    match joined {
        Ok((result, elapsed)) => {
            timings.record(stage, elapsed);
            result
        }
        Err(e) if e.is_cancelled() => Err(FetchError::Cancelled),
        Err(e) => Err(FetchError::TaskFailed(format!("{} task: {}", stage, e))),
    }
}

/// Absolute, lexically normalized root / 规范化的根目录
///
/// `idx`, `./idx` and `idx/` name one directory and must share one flight.
/// `..` is resolved lexically, without following symlinks.
fn flight_key(root: &Path) -> PathBuf {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(root),
            Err(e) => {
                tracing::warn!("Cannot resolve {:?} against the working directory: {}", root, e);
                root.to_path_buf()
            }
        }
    };

    let mut key = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                key.pop();
            }
            other => key.push(other.as_os_str()),
        }
    }
    key
}

/// `.<name>.staging-<uuid>` next to the root / 与根目录同级的临时目录
fn staging_path(root: &Path) -> PathBuf {
    let name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    root.with_file_name(format!(".{}.staging-{}", name, uuid::Uuid::new_v4().simple()))
}

/// Move a completed staging directory onto the root / 提交临时目录
async fn promote(staging: &Path, root: &Path) -> Result<(), FetchError> {
    if let Ok(meta) = tokio::fs::metadata(root).await {
        if meta.is_dir() {
            tracing::info!("{:?} populated concurrently, discarding staging copy", root);
            remove_staging(staging).await;
            return Ok(());
        }
    }

    // A corrupt occupant (file, dangling symlink) is replaced.
    match tokio::fs::symlink_metadata(root).await {
        Ok(_) => {
            tracing::warn!("Removing corrupt index cache entry at {:?}", root);
            tokio::fs::remove_file(root)
                .await
                .map_err(|e| FetchError::local_io(root, &e))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(FetchError::local_io(root, &e)),
    }

    tokio::fs::rename(staging, root)
        .await
        .map_err(|e| FetchError::local_io(root, &e))
}

async fn remove_staging(staging: &Path) {
    match tokio::fs::remove_dir_all(staging).await {
        Ok(()) => tracing::debug!("Removed staging directory {:?}", staging),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove staging directory {:?}: {}", staging, e),
    }
}
