// Driver package / 驱动包
pub mod local;
pub mod s3;

use std::sync::Arc;

use crate::storage::StoreRegistry;

/// Register all drivers to StoreRegistry / 注册所有驱动
pub fn register_all(registry: &StoreRegistry) {
    // Register S3 compatible object storage driver / 注册S3对象存储驱动
    registry.register_factory(Arc::new(s3::S3StoreFactory));
    // Register local filesystem driver (development, tests) / 注册本地驱动
    registry.register_factory(Arc::new(local::LocalStoreFactory));
}
