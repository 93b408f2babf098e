//! S3驱动核心实现
//!
//! 设计原则：
//! - 只提供原语（head_object, get_object_stream）
//! - 响应体以流的形式交给调用方，不在内存中拼接完整对象

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::Region;

use crate::storage::{ByteStream, ObjectMeta, ObjectStore, RemoteObjectRef, StoreError};
use super::config::S3Config;

/// S3驱动
pub struct S3Store {
    config: S3Config,
    region: Region,
    credentials: Credentials,
}

impl S3Store {
    /// 创建新的S3驱动实例
    pub fn new(config: S3Config) -> Result<Self> {
        let credentials = Self::create_credentials(&config)?;
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.resolved_endpoint(),
        };
        Ok(Self { config, region, credentials })
    }

    /// 创建S3凭证：优先使用配置，其次环境变量
    fn create_credentials(config: &S3Config) -> Result<Credentials> {
        if config.has_static_credentials() {
            Credentials::new(
                Some(&config.access_key_id),
                Some(&config.secret_access_key),
                if config.session_token.is_empty() { None } else { Some(&config.session_token) },
                None,
                None,
            )
            .map_err(|e| anyhow!("创建S3凭证失败: {}", e))
        } else {
            Credentials::from_env().map_err(|e| anyhow!("从环境变量读取S3凭证失败: {}", e))
        }
    }

    /// 创建S3 Bucket客户端
    fn bucket(&self, name: &str) -> Result<Box<Bucket>, StoreError> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| StoreError::Transport(format!("创建S3 Bucket失败: {}", e)))?;

        Ok(if self.config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

/// Map an HTTP status to a store error / 将HTTP状态码映射为存储错误
fn status_error(status: u16, object: &RemoteObjectRef) -> StoreError {
    match status {
        404 => StoreError::NotFound(object.to_string()),
        401 | 403 => StoreError::AccessDenied(object.to_string()),
        _ => StoreError::Transport(format!("S3 returned HTTP {} for {}", status, object)),
    }
}

fn s3_error(err: S3Error, object: &RemoteObjectRef) -> StoreError {
    match err {
        S3Error::HttpFailWithBody(status, _) => status_error(status, object),
        other => StoreError::Transport(format!("S3 request for {} failed: {}", object, other)),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn head_object(&self, object: &RemoteObjectRef) -> Result<ObjectMeta, StoreError> {
        let bucket = self.bucket(&object.bucket)?;

        let (head, status) = match bucket.head_object(&object.key).await {
            Ok(result) => result,
            Err(err) => {
                return match s3_error(err, object) {
                    StoreError::NotFound(_) => Ok(ObjectMeta::missing()),
                    other => Err(other),
                };
            }
        };

        tracing::debug!("S3 HeadObject: object={}, status={}", object, status);

        match status {
            200..=299 => Ok(ObjectMeta::found(head.content_length.unwrap_or(0).max(0) as u64)),
            404 => Ok(ObjectMeta::missing()),
            other => Err(status_error(other, object)),
        }
    }

    async fn get_object_stream(&self, object: &RemoteObjectRef) -> Result<ByteStream, StoreError> {
        let bucket = self.bucket(&object.bucket)?;

        let response = bucket
            .get_object_stream(&object.key)
            .await
            .map_err(|e| s3_error(e, object))?;

        if !(200..300).contains(&response.status_code) {
            return Err(status_error(response.status_code, object));
        }

        let label = object.to_string();
        let stream = response.bytes.map(move |chunk| {
            chunk.map_err(|e| StoreError::Transport(format!("S3 body read for {} failed: {}", label, e)))
        });
        Ok(Box::pin(stream))
    }
}
