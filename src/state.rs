use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::fetch::{FetchCoordinator, FetchReport, FetchOptions};
use crate::search::{SearchError, SearchIndex};
use crate::storage::{ObjectStore, RemoteObjectRef};

pub struct AppState {
    pub coordinator: FetchCoordinator,
    /// Archive holding the index / 索引归档对象
    pub object: RemoteObjectRef,
    /// Extraction root / 解压根目录
    pub root: PathBuf,
    /// Directory opened by the search engine / 索引目录
    pub index_dir: PathBuf,
    index: RwLock<Option<Arc<SearchIndex>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        options: FetchOptions,
        object: RemoteObjectRef,
        root: PathBuf,
        index_dir: PathBuf,
    ) -> Self {
        Self {
            coordinator: FetchCoordinator::new(store, options),
            object,
            root,
            index_dir,
            index: RwLock::new(None),
        }
    }

    pub fn from_config(config: &AppConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(
            store,
            config.fetch_options(),
            config.index_object(),
            config.index_root(),
            config.index_dir(),
        )
    }

    /// 获取或打开索引（懒加载）
    ///
    /// A freshly fetched root replaces whatever was loaded before.
    pub async fn get_index(&self, fetched: &FetchReport) -> Result<Arc<SearchIndex>, SearchError> {
        if fetched.cache_hit {
            let guard = self.index.read().await;
            if let Some(ref idx) = *guard {
                return Ok(idx.clone());
            }
        }

        let mut guard = self.index.write().await;
        // 双重检查
        if fetched.cache_hit {
            if let Some(ref idx) = *guard {
                return Ok(idx.clone());
            }
        }

        let idx = Arc::new(open_blocking(&self.index_dir).await?);
        *guard = Some(idx.clone());
        Ok(idx)
    }

    pub async fn index_loaded(&self) -> bool {
        self.index.read().await.is_some()
    }
}

async fn open_blocking(path: &Path) -> Result<SearchIndex, SearchError> {
    let path = path.to_path_buf();
    let joined = tokio::task::spawn_blocking({
        let path = path.clone();
        move || SearchIndex::open(path)
    })
    .await;
    match joined {
        Ok(result) => result,
        Err(e) => Err(SearchError::Io {
            path,
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        }),
    }
}
