use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::storage::{RemoteObjectRef, StoreError};

/// Pipeline stage that ran out of time / 超时阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Head,
    Download,
    Fetch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Head => "head object",
            Stage::Download => "download",
            Stage::Fetch => "fetch",
        })
    }
}

/// Index fetch error taxonomy / 索引拉取错误分类
///
/// Clone so a single in-flight fetch can hand the same outcome to every
/// waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("cannot probe index cache at {}: {message}", path.display())]
    CacheUnreadable { path: PathBuf, message: String },

    #[error("remote object {0} not found")]
    RemoteNotFound(RemoteObjectRef),

    #[error("{stage} timed out after {}ms", after.as_millis())]
    RemoteTimeout { stage: Stage, after: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported archive format: {0}")]
    UnsupportedArchiveFormat(String),

    #[error("archive entry {entry:?} escapes the destination root")]
    PathTraversalRejected { entry: String },

    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("archive stream failed upstream: {0}")]
    Upstream(String),

    #[error("pipe closed by the extractor")]
    PipeClosed,

    #[error("local I/O error at {}: {message}", path.display())]
    LocalIo {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("pipeline task failed: {0}")]
    TaskFailed(String),
}

impl FetchError {
    pub fn local_io(path: impl AsRef<Path>, err: &io::Error) -> Self {
        FetchError::LocalIo {
            path: path.as_ref().to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn from_store(err: StoreError, object: &RemoteObjectRef) -> Self {
        match err {
            StoreError::NotFound(_) => FetchError::RemoteNotFound(object.clone()),
            StoreError::AccessDenied(what) => FetchError::Transport(format!("access denied: {}", what)),
            StoreError::Transport(message) => FetchError::Transport(message),
        }
    }

    /// Stable tag for logs and API bodies / 稳定的错误标识
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::CacheUnreadable { .. } => "cache_unreadable",
            FetchError::RemoteNotFound(_) => "remote_not_found",
            FetchError::RemoteTimeout { .. } => "remote_timeout",
            FetchError::Transport(_) => "transport_error",
            FetchError::UnsupportedArchiveFormat(_) => "unsupported_archive_format",
            FetchError::PathTraversalRejected { .. } => "path_traversal_rejected",
            FetchError::CorruptArchive(_) => "corrupt_archive",
            FetchError::Upstream(_) => "upstream_error",
            FetchError::PipeClosed => "pipe_closed",
            FetchError::LocalIo { .. } => "local_io_error",
            FetchError::Cancelled => "cancelled",
            FetchError::TaskFailed(_) => "task_failed",
        }
    }

    /// A consequence of the sibling task failing rather than a cause.
    /// 次级错误：由另一个任务失败引起
    pub fn is_secondary(&self) -> bool {
        matches!(
            self,
            FetchError::PipeClosed | FetchError::Upstream(_) | FetchError::Cancelled
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::RemoteTimeout { .. })
    }
}
