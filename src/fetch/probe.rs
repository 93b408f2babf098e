//! Local index cache probe / 本地索引缓存探测
//!
//! Cheap and synchronous: a single `stat`, never network I/O. Re-run on
//! every request, nothing is memoized.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// A directory is present / 目录存在
    Present,
    /// Nothing at the path (cold start) / 冷启动
    Missing,
    /// Something other than a directory occupies the path / 路径被非目录占用
    Corrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheState {
    pub path: PathBuf,
    pub status: CacheStatus,
}

impl CacheState {
    pub fn present(&self) -> bool {
        self.status == CacheStatus::Present
    }
}

/// Probe `path` for a usable index directory / 探测索引目录
pub fn probe(path: &Path) -> Result<CacheState, FetchError> {
    let status = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => CacheStatus::Present,
        Ok(meta) => {
            tracing::warn!(
                "Index cache corrupt: {:?} exists but is not a directory (file_type={:?})",
                path,
                meta.file_type()
            );
            CacheStatus::Corrupt
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => CacheStatus::Missing,
        Err(e) => {
            return Err(FetchError::CacheUnreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    Ok(CacheState {
        path: path.to_path_buf(),
        status,
    })
}
