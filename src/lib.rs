pub mod api;
pub mod config;
pub mod fetch;
pub mod search;
pub mod state;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

/// Build a store registry with all drivers registered / 注册所有存储驱动
pub fn store_registry() -> storage::StoreRegistry {
    let registry = storage::StoreRegistry::new();
    drivers::register_all(&registry);
    registry
}
