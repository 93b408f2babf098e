//! Application configuration module / 应用配置模块
//!
//! Loaded from an optional `config.json` in the working directory, then
//! overridden by environment variables (the usual way to configure a
//! serverless function). Missing file means defaults.
//! 先读取工作目录下的 config.json（可选），再用环境变量覆盖

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::drivers::s3::S3Config;
use crate::fetch::{Deadlines, FetchOptions};
use crate::storage::RemoteObjectRef;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Object store configuration / 对象存储配置
    pub store: StoreConfig,
    /// Index location, remote and local / 索引位置
    pub index: IndexConfig,
    /// Fetch pipeline budgets / 拉取流水线参数
    pub fetch: FetchConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Driver type: "s3" or "local" / 驱动类型
    pub driver: String,
    pub s3: S3Config,
    /// Root directory for the local driver / 本地驱动根目录
    pub local_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub bucket: String,
    pub key: String,
    /// Extraction root / 解压目标目录
    pub root: String,
    /// Index directory inside the root / 根目录下的索引目录
    pub index_path: String,
    /// Fetch the index once at startup / 启动时预拉取
    pub prefetch_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub head_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub pipe_chunks: usize,
    pub verify_head: bool,
    pub grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: "s3".to_string(),
            s3: S3Config {
                endpoint: "https://storage.yandexcloud.net".to_string(),
                region: "ru-central1".to_string(),
                ..S3Config::default()
            },
            local_root: "objects".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            bucket: "sls-search".to_string(),
            key: "bleve.zip".to_string(),
            root: "/tmp/index".to_string(),
            index_path: "index".to_string(),
            prefetch_on_start: false,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        let options = FetchOptions::default();
        Self {
            head_timeout_ms: options.deadlines.head.as_millis() as u64,
            fetch_timeout_ms: options.deadlines.fetch.as_millis() as u64,
            pipe_chunks: options.pipe_chunks,
            verify_head: options.verify_head,
            grace_ms: options.grace.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// The archive object / 索引归档对象
    pub fn index_object(&self) -> RemoteObjectRef {
        RemoteObjectRef::new(&self.index.bucket, &self.index.key)
    }

    /// Destination root the archive is extracted into / 解压根目录
    pub fn index_root(&self) -> PathBuf {
        PathBuf::from(&self.index.root)
    }

    /// Directory opened by the search engine / 搜索引擎打开的目录
    pub fn index_dir(&self) -> PathBuf {
        let root = self.index_root();
        if self.index.index_path.is_empty() {
            root
        } else {
            root.join(&self.index.index_path)
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            deadlines: Deadlines {
                head: Duration::from_millis(self.fetch.head_timeout_ms),
                fetch: Duration::from_millis(self.fetch.fetch_timeout_ms),
            },
            pipe_chunks: self.fetch.pipe_chunks.max(1),
            verify_head: self.fetch.verify_head,
            grace: Duration::from_millis(self.fetch.grace_ms),
        }
    }

    /// Driver config handed to the store factory / 传给驱动工厂的配置
    pub fn store_driver_config(&self) -> Result<Value> {
        match self.store.driver.as_str() {
            "local" => Ok(serde_json::json!({ "root": self.store.local_root })),
            _ => serde_json::to_value(&self.store.s3).context("Failed to serialize S3 config"),
        }
    }

    /// Apply environment overrides through `lookup` / 应用环境变量覆盖
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let text = |name: &str, target: &mut String| {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };
        text("INDEX_BUCKET", &mut self.index.bucket);
        text("INDEX_KEY", &mut self.index.key);
        text("INDEX_ROOT", &mut self.index.root);
        text("INDEX_PATH", &mut self.index.index_path);
        text("STORE_DRIVER", &mut self.store.driver);
        text("S3_ENDPOINT", &mut self.store.s3.endpoint);
        text("S3_REGION", &mut self.store.s3.region);
        text("AWS_ACCESS_KEY_ID", &mut self.store.s3.access_key_id);
        text("AWS_SECRET_ACCESS_KEY", &mut self.store.s3.secret_access_key);
        text("AWS_SESSION_TOKEN", &mut self.store.s3.session_token);
        text("LOCAL_STORE_ROOT", &mut self.store.local_root);
        text("HOST", &mut self.server.host);

        if let Some(value) = lookup("S3_FORCE_PATH_STYLE") {
            self.store.s3.force_path_style = parse_bool(&value)
                .with_context(|| format!("Invalid S3_FORCE_PATH_STYLE: {:?}", value))?;
        }
        if let Some(value) = lookup("PREFETCH_ON_START") {
            self.index.prefetch_on_start = parse_bool(&value)
                .with_context(|| format!("Invalid PREFETCH_ON_START: {:?}", value))?;
        }
        if let Some(value) = lookup("PORT") {
            self.server.port = value.parse().with_context(|| format!("Invalid PORT: {:?}", value))?;
        }
        if let Some(value) = lookup("HEAD_TIMEOUT_MS") {
            self.fetch.head_timeout_ms = value
                .parse()
                .with_context(|| format!("Invalid HEAD_TIMEOUT_MS: {:?}", value))?;
        }
        if let Some(value) = lookup("FETCH_TIMEOUT_MS") {
            self.fetch.fetch_timeout_ms = value
                .parse()
                .with_context(|| format!("Invalid FETCH_TIMEOUT_MS: {:?}", value))?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Parse config.json content / 解析配置内容
pub fn parse_config(content: &str) -> Result<AppConfig> {
    serde_json::from_str(content).context("Failed to parse config file")
}

/// Load configuration: file (if any) then environment / 加载配置
pub fn load_config() -> Result<AppConfig> {
    let config_path = get_config_path();

    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {:?}", config_path))?;
        let config = parse_config(&content)?;
        tracing::info!("Loaded configuration from {:?}", config_path);
        config
    } else {
        tracing::info!("No config file at {:?}, using defaults", config_path);
        AppConfig::default()
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<AppConfig>>> {
    let config = Arc::new(RwLock::new(load_config()?));
    CONFIG
        .set(config.clone())
        .map_err(|_| anyhow::anyhow!("Config already initialized"))?;
    Ok(config)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG
        .get_or_init(|| {
            let config = load_config().unwrap_or_else(|e| {
                tracing::warn!("Falling back to default configuration: {:#}", e);
                AppConfig::default()
            });
            Arc::new(RwLock::new(config))
        })
        .clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}
