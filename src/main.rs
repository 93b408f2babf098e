use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sls_search::config;
use sls_search::fetch::StageTimings;
use sls_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sls_search=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration / 加载配置
    config::init_config()?;
    let app_config = config::config();
    tracing::info!("Server will listen on {}:{}", app_config.server.host, app_config.server.port);

    // Register all storage driver factories / 注册所有存储驱动工厂
    let registry = sls_search::store_registry();
    let store = registry
        .create_store(&app_config.store.driver, app_config.store_driver_config()?)
        .with_context(|| format!("Failed to create '{}' store", app_config.store.driver))?;

    let state = Arc::new(AppState::from_config(&app_config, store));
    tracing::info!(
        "Index {} -> {:?} (head {}ms, fetch {}ms)",
        state.object,
        state.index_dir,
        app_config.fetch.head_timeout_ms,
        app_config.fetch.fetch_timeout_ms
    );

    // Optional warm-up fetch / 启动时预拉取索引
    if app_config.index.prefetch_on_start {
        let state = state.clone();
        tokio::spawn(async move {
            let mut timings = StageTimings::new();
            match state
                .coordinator
                .ensure_index_available(&state.object, &state.root, &mut timings)
                .await
                .into_result()
            {
                Ok(report) => tracing::info!("Prefetch done: {:?} {:?}", report, timings),
                Err(e) => tracing::warn!("Prefetch failed ({}): {}", e.kind(), e),
            }
        });
    }

    let app = sls_search::api::router(state);

    let bind_addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
