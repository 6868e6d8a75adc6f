use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::{info, warn};
use rand::distr::{Alphanumeric, SampleString};
use serde_json::Value;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::error::{ApiError, Result};
use super::state::AppState;
use super::types::*;
use crate::matcher::Thresholds;
use crate::metrics;
use crate::search::{SearchKind, SearchOutput, SearchRequest};

/// 上传的查询图片，使用完毕后删除
struct UploadFile(PathBuf);

impl Drop for UploadFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            warn!("删除上传文件失败：{} ({})", self.0.display(), e);
        }
    }
}

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(ApiError::Unauthorized.into());
    }
    Ok(())
}

/// 开始扫描
#[utoipa::path(
    post,
    path = "/api/scan",
    responses(
        (status = 200, body = ScanResponse),
    )
)]
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<ScanResponse>> {
    check_token(&state, &token)?;
    let status = match state.db.start_scan(state.scan.clone()) {
        true => "start scanning",
        false => "already scanning",
    };
    Ok(Json(ScanResponse { status: status.to_string() }))
}

/// 获取扫描状态
#[utoipa::path(
    get,
    path = "/api/status",
    responses(
        (status = 200, body = StatusResponse),
    )
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse::new(&state.db.progress(), state.db.cache_enabled()))
}

/// 搜索图片或视频
#[utoipa::path(
    post,
    path = "/api/match",
    request_body(content = MatchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = Vec<MatchItem>),
        (status = 400, description = "查询参数有误"),
    )
)]
pub async fn match_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<MatchRequest>,
) -> Result<Json<Value>> {
    let kind = SearchKind::try_from(data.search_type)?;

    let upload = match data.file {
        Some(file) => {
            let dir = state.db.conf_dir().upload_dir();
            tokio::fs::create_dir_all(&dir).await?;
            let path = dir.join(Alphanumeric.sample_string(&mut rand::rng(), 16));
            tokio::fs::write(&path, &file).await?;
            Some(UploadFile(path))
        }
        None => None,
    };

    let positive = match kind {
        SearchKind::TextImagePair => data.text.or(data.positive),
        _ => data.positive,
    };
    let request = SearchRequest {
        kind,
        positive: positive.unwrap_or_default(),
        negative: data.negative.unwrap_or_default(),
        image: upload.as_ref().map(|file| file.0.clone()),
        thresholds: Thresholds::from_percent(
            data.positive_threshold.unwrap_or(state.search.positive_threshold),
            data.negative_threshold.unwrap_or(state.search.negative_threshold),
            data.image_threshold.unwrap_or(state.search.image_threshold),
        ),
        top_n: data.top_n.unwrap_or(state.search.count),
    };

    info!("搜索：{} {:?}", kind.tag(), request.positive);
    let output = state.db.search(&request).await?;
    drop(upload);

    match output {
        SearchOutput::Ranked(result) => {
            let result = result.into_iter().map(MatchItem::from).collect::<Vec<_>>();
            Ok(Json(serde_json::to_value(result)?))
        }
        SearchOutput::Pair { score } => {
            Ok(Json(serde_json::to_value(PairResponse { score: format!("{:.2}", score * 100.) })?))
        }
    }
}

/// 清空搜索结果缓存
#[utoipa::path(
    post,
    path = "/api/clean_cache",
    responses(
        (status = 200, body = CleanCacheResponse),
    )
)]
pub async fn clean_cache_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
) -> Result<Json<CleanCacheResponse>> {
    check_token(&state, &token)?;
    let count = state.db.clear_cache().await?;
    Ok(Json(CleanCacheResponse { count }))
}

/// 获取图片文件
pub async fn get_image_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Response> {
    let path = state.db.image_path(id).await?.ok_or(ApiError::NotFound)?;
    serve_file(path, request).await
}

/// 获取视频文件，只能访问数据库中已有的视频
pub async fn get_video_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Response> {
    let path = state.db.video_path(id).await?.ok_or(ApiError::NotFound)?;
    serve_file(path, request).await
}

async fn serve_file(path: String, request: Request) -> Result<Response> {
    let response = ServeFile::new(path).oneshot(request).await?;
    Ok(response.into_response())
}

/// 导出 prometheus 指标
pub async fn metrics_handler() -> Result<String> {
    Ok(metrics::gather_text()?)
}
