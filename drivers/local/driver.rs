use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::io::ReaderStream;

use crate::storage::{ByteStream, ObjectMeta, ObjectStore, RemoteObjectRef, StoreError, StoreFactory};

/// Read buffer for streamed bodies / 流式读取缓冲区
const CHUNK_SIZE: usize = 64 * 1024;

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Map bucket/key to a file under root, rejecting traversal / 规范化路径，防止目录穿越
    fn object_path(&self, object: &RemoteObjectRef) -> Result<PathBuf, StoreError> {
        let mut full_path = self.root.clone();
        for part in [object.bucket.as_str(), object.key.as_str()] {
            let part = part.replace('\\', "/");
            for component in Path::new(part.trim_start_matches('/')).components() {
                match component {
                    Component::Normal(name) => full_path.push(name),
                    Component::CurDir => {}
                    _ => {
                        return Err(StoreError::AccessDenied(format!(
                            "{} (path exceeds store root)",
                            object
                        )))
                    }
                }
            }
        }
        Ok(full_path)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn head_object(&self, object: &RemoteObjectRef) -> Result<ObjectMeta, StoreError> {
        let path = self.object_path(object)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ObjectMeta::found(meta.len())),
            Ok(_) => Ok(ObjectMeta::missing()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectMeta::missing()),
            Err(e) => Err(StoreError::Transport(format!("stat {}: {}", path.display(), e))),
        }
    }

    async fn get_object_stream(&self, object: &RemoteObjectRef) -> Result<ByteStream, StoreError> {
        let path = self.object_path(object)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(object.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(StoreError::AccessDenied(object.to_string()))
            }
            Err(e) => return Err(StoreError::Transport(format!("open {}: {}", path.display(), e))),
        };

        let stream = ReaderStream::with_capacity(file, CHUNK_SIZE)
            .map(|chunk| chunk.map_err(|e| StoreError::Transport(e.to_string())));
        Ok(Box::pin(stream))
    }
}

// 本地驱动工厂
pub struct LocalStoreFactory;

impl StoreFactory for LocalStoreFactory {
    fn driver_type(&self) -> &'static str {
        "local"
    }

    fn create_store(&self, config: Value) -> Result<Arc<dyn ObjectStore>> {
        let root = config
            .get("root")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("Missing 'root' in local driver config"))?;

        // 确保是绝对路径
        let root_path = PathBuf::from(root);
        let root_path = if root_path.is_absolute() {
            root_path
        } else {
            std::env::current_dir()?.join(root_path)
        };

        Ok(Arc::new(LocalStore::new(root_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_head_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sls-search")).unwrap();
        std::fs::write(dir.path().join("sls-search/bleve.zip"), b"PK\x03\x04payload").unwrap();

        let store = LocalStore::new(dir.path().to_path_buf());
        let object = RemoteObjectRef::new("sls-search", "bleve.zip");

        let meta = store.head_object(&object).await.unwrap();
        assert_eq!(meta, ObjectMeta::found(11));

        let chunks: Vec<bytes::Bytes> = store.get_object_stream(&object).await.unwrap().try_collect().await.unwrap();
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, b"PK\x03\x04payload");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let object = RemoteObjectRef::new("sls-search", "absent.zip");

        assert_eq!(store.head_object(&object).await.unwrap(), ObjectMeta::missing());
        assert!(matches!(store.get_object_stream(&object).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reject_traversal_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        let object = RemoteObjectRef::new("sls-search", "../../etc/passwd");

        assert!(matches!(store.head_object(&object).await, Err(StoreError::AccessDenied(_))));
    }

    #[test]
    fn test_factory_requires_root() {
        assert!(LocalStoreFactory.create_store(Value::Null).is_err());
        let store = LocalStoreFactory.create_store(serde_json::json!({"root": "/srv/objects"})).unwrap();
        assert_eq!(store.name(), "local");
    }
}
