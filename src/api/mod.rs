pub mod search;

use std::sync::Arc;

use axum::{routing::get, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// Error with an explicit code and detail payload / 带状态码和详情的错误
    pub fn failure(code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Build the HTTP router / 构建路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", get(search::search))
        .route("/healthz", get(search::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
