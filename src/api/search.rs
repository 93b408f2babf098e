//! Search endpoint / 搜索接口
//!
//! `GET /search?term=..&fields=a,b&facets=c&limit=n&offset=n`
//!
//! Every request probes the local cache; a miss fetches the index archive
//! before the query runs. A failed fetch never falls through to a query.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::fetch::{probe, CacheStatus, FetchError, FetchReport, StageTimings};
use crate::search::{SearchError, SearchQuery, SearchResults};
use crate::state::AppState;

const MAX_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub term: Option<String>,
    /// Comma separated stored fields to return / 返回的字段（逗号分隔）
    pub fields: Option<String>,
    /// Comma separated facet fields / 分面字段（逗号分隔）
    pub facets: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: SearchResults,
    pub fetch: FetchReport,
    /// Stage durations in microseconds / 各阶段耗时（微秒）
    pub durations: StageTimings,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub durations: StageTimings,
}

type ApiError = (StatusCode, Json<ApiResponse<ErrorDetail>>);

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// HTTP status for a fetch failure / 拉取错误对应的状态码
pub fn fetch_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::RemoteTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        FetchError::RemoteNotFound(_)
        | FetchError::Transport(_)
        | FetchError::UnsupportedArchiveFormat(_)
        | FetchError::PathTraversalRejected { .. }
        | FetchError::CorruptArchive(_)
        | FetchError::Upstream(_) => StatusCode::BAD_GATEWAY,
        FetchError::CacheUnreadable { .. }
        | FetchError::PipeClosed
        | FetchError::LocalIo { .. }
        | FetchError::Cancelled
        | FetchError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn fetch_failure(err: FetchError, durations: StageTimings) -> ApiError {
    let status = fetch_status(&err);
    (
        status,
        Json(ApiResponse::failure(
            status.as_u16(),
            err.to_string(),
            ErrorDetail {
                kind: err.kind(),
                durations,
            },
        )),
    )
}

fn search_failure(err: SearchError, durations: StageTimings) -> ApiError {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (
        status,
        Json(ApiResponse::failure(
            status.as_u16(),
            err.to_string(),
            ErrorDetail {
                kind: "search_error",
                durations,
            },
        )),
    )
}

/// GET /search
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiResponse<SearchResponse>>, ApiError> {
    let term = params.term.as_deref().map(str::trim).unwrap_or_default();
    if term.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure(
                400,
                "term is required",
                ErrorDetail {
                    kind: "bad_request",
                    durations: StageTimings::new(),
                },
            )),
        ));
    }

    let mut timings = StageTimings::new();
    let report = match state
        .coordinator
        .ensure_index_available(&state.object, &state.root, &mut timings)
        .await
        .into_result()
    {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Index unavailable for query {:?}: {}", term, e);
            return Err(fetch_failure(e, timings));
        }
    };

    let started = Instant::now();
    let index = state.get_index(&report).await;
    timings.record_since("openIndex", started);
    let index = match index {
        Ok(index) => index,
        Err(e) => {
            tracing::error!("Failed to open index at {:?}: {}", state.index_dir, e);
            return Err(search_failure(e, timings));
        }
    };

    let query = SearchQuery::new(term)
        .with_fields(split_list(params.fields.as_deref()))
        .with_facets(split_list(params.facets.as_deref()))
        .with_limit(params.limit.unwrap_or(10).clamp(1, MAX_LIMIT))
        .with_offset(params.offset.unwrap_or(0));
    let results = timings.time("queryIndex", || index.query(&query));

    tracing::debug!(
        "Query {:?}: {} hits, cache_hit={}",
        term,
        results.total,
        report.cache_hit
    );
    Ok(Json(ApiResponse::success(SearchResponse {
        results,
        fetch: report,
        durations: timings,
    })))
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub cache: CacheStatus,
    pub index_loaded: bool,
    pub in_flight: usize,
    pub active_tasks: usize,
}

/// GET /healthz - live cache state, never fetches / 健康检查
pub async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Health>>, ApiError> {
    let cache = probe(&state.root).map_err(|e| fetch_failure(e, StageTimings::new()))?;
    Ok(Json(ApiResponse::success(Health {
        cache: cache.status,
        index_loaded: state.index_loaded().await,
        in_flight: state.coordinator.in_flight(),
        active_tasks: state.coordinator.active_tasks(),
    })))
}
