mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(api::scan_handler, api::status_handler, api::match_handler, api::clean_cache_handler),
    components(schemas(
        types::MatchForm,
        types::MatchItem,
        types::PairResponse,
        types::StatusResponse,
        types::ScanResponse,
        types::CleanCacheResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/scan", post(api::scan_handler))
        .route("/api/status", get(api::status_handler))
        .route("/api/match", post(api::match_handler))
        .route("/api/clean_cache", post(api::clean_cache_handler))
        .route("/api/get_image/{id}", get(api::get_image_handler))
        .route("/api/get_video/{id}", get(api::get_video_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：50M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 50))
        .with_state(state)
}
