use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::stats::CacheStats;
use crate::store::MutableDocumentStore;
use crate::visit_cache::VisitCache;

pub type SharedStore = Arc<dyn MutableDocumentStore>;
pub type SharedCache = Arc<VisitCache<SharedStore>>;

#[derive(Deserialize)]
pub struct VisitParams {
    /// 逗号分隔的文档 id，如 `5,9,12`
    pub ids: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct DocResponse {
    pub id: u32,
    pub body: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VisitResponse {
    pub docs: Vec<DocResponse>,
    pub codec: String,
    pub compressed_bytes: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EraseResponse {
    pub existed: bool,
}

/// HTTP 层错误：参数错误 400，batch 与缓存冲突 409，其余 500
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::BatchOverlap(_) => ApiError::Conflict(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("worker task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::warn!("request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

pub fn parse_ids(s: &str) -> Result<Vec<u32>, ApiError> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<u32>()
                .map_err(|_| ApiError::BadRequest(format!("invalid document id: {t:?}")))
        })
        .collect()
}

/// 文档 visit 服务（供上层 serving 进程调用）
pub struct VisitServer {
    pub cache: SharedCache,
}

impl VisitServer {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/visit", get(visit_handler))
            .route("/docs/:id", put(put_handler).delete(delete_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.cache.clone())
    }

    pub async fn run(self, bind: &str, port: u16) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind, port)).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        tracing::info!("HTTP Visit Server listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

// 缓存读写会做同步 I/O，统一丢到 blocking 线程池
async fn visit_handler(
    Query(params): Query<VisitParams>,
    State(cache): State<SharedCache>,
) -> Result<Json<VisitResponse>, ApiError> {
    let ids = parse_ids(&params.ids)?;
    let blobs = tokio::task::spawn_blocking(move || cache.try_read(&ids)).await??;

    let codec = blobs.codec().to_string();
    let compressed_bytes = blobs.compressed_bytes().len();
    let docs = blobs
        .decompress()?
        .iter()
        .map(|(id, body)| DocResponse {
            id,
            body: String::from_utf8_lossy(body).into_owned(),
        })
        .collect();

    Ok(Json(VisitResponse {
        docs,
        codec,
        compressed_bytes,
    }))
}

async fn put_handler(
    Path(id): Path<u32>,
    State(cache): State<SharedCache>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    tokio::task::spawn_blocking(move || cache.write(id, &body)).await??;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_handler(
    Path(id): Path<u32>,
    State(cache): State<SharedCache>,
) -> Result<Json<EraseResponse>, ApiError> {
    let existed = tokio::task::spawn_blocking(move || cache.erase(id)).await??;
    Ok(Json(EraseResponse { existed }))
}

async fn stats_handler(State(cache): State<SharedCache>) -> Json<CacheStats> {
    Json(cache.stats())
}
