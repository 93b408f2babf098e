//! S3驱动工厂

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::storage::{ObjectStore, StoreFactory};
use super::config::S3Config;
use super::driver::S3Store;

/// S3驱动工厂
pub struct S3StoreFactory;

impl StoreFactory for S3StoreFactory {
    fn driver_type(&self) -> &'static str {
        "s3"
    }

    fn create_store(&self, config: Value) -> Result<Arc<dyn ObjectStore>> {
        let config: S3Config = if config.is_null() {
            S3Config::default()
        } else {
            serde_json::from_value(config).map_err(|e| anyhow!("S3配置解析失败: {}", e))?
        };
        Ok(Arc::new(S3Store::new(config)?))
    }
}
