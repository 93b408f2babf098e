use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde_json::Value;

use super::ObjectStore;

/// Store factory trait / 存储驱动工厂 trait
pub trait StoreFactory: Send + Sync {
    /// Driver type name / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// Create a store from its JSON config / 创建驱动实例
    fn create_store(&self, config: Value) -> Result<Arc<dyn ObjectStore>>;
}

/// Registry of store factories keyed by driver type / 驱动工厂注册表
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: Arc<RwLock<HashMap<&'static str, Arc<dyn StoreFactory>>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register driver factory / 注册驱动工厂
    pub fn register_factory(&self, factory: Arc<dyn StoreFactory>) {
        let driver_type = factory.driver_type();
        self.factories.write().insert(driver_type, factory);
        tracing::debug!("Store factory registered: {}", driver_type);
    }

    /// Registered driver types, sorted / 已注册的驱动类型
    pub fn driver_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.read().keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Create a store instance for `driver_type` / 创建驱动实例
    pub fn create_store(&self, driver_type: &str, config: Value) -> Result<Arc<dyn ObjectStore>> {
        let factory = self.factories.read().get(driver_type).cloned();
        let factory = factory.ok_or_else(|| {
            anyhow!(
                "unknown store driver '{}' (available: {})",
                driver_type,
                self.driver_types().join(", ")
            )
        })?;
        let store = factory.create_store(config)?;
        tracing::info!("Object store created: driver={}", store.name());
        Ok(store)
    }
}
