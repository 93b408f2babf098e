//! Object storage primitives / 对象存储原语
//!
//! Drivers only expose two primitives: `head_object` and `get_object_stream`.
//! Flow control (deadlines, pipes, extraction) belongs to the fetch module.
//! 驱动只提供原语，流程控制在 fetch 模块

pub mod manager;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

pub use manager::{StoreFactory, StoreRegistry};

/// Byte stream of a remote object / 远程对象字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>>;

/// Remote object reference (bucket + key) / 远程对象引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    pub bucket: String,
    pub key: String,
}

impl RemoteObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for RemoteObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Result of a HEAD request / HEAD 请求结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub exists: bool,
    /// Content length in bytes (0 when unknown or absent) / 内容长度
    pub size: u64,
}

impl ObjectMeta {
    pub fn found(size: u64) -> Self {
        Self { exists: true, size }
    }

    pub fn missing() -> Self {
        Self { exists: false, size: 0 }
    }
}

/// Object store errors / 对象存储错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("access denied for {0}")]
    AccessDenied(String),
    #[error("{0}")]
    Transport(String),
}

/// Object store interface (provides only primitive operations) / 对象存储接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Resolve existence and size / 获取对象元信息
    async fn head_object(&self, object: &RemoteObjectRef) -> Result<ObjectMeta, StoreError>;

    /// Open a streaming body; bytes are never collected in memory / 打开流式读取
    async fn get_object_stream(&self, object: &RemoteObjectRef) -> Result<ByteStream, StoreError>;
}
