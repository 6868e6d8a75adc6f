use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::Serialize;
use utoipa::ToSchema;

use crate::indexer::ScanProgress;
use crate::search::RankedMatch;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct MatchRequest {
    pub search_type: u8,
    pub positive: Option<String>,
    pub negative: Option<String>,
    pub text: Option<String>,
    pub top_n: Option<usize>,
    pub positive_threshold: Option<f32>,
    pub negative_threshold: Option<f32>,
    pub image_threshold: Option<f32>,
    #[form_data(limit = "50MiB")]
    pub file: Option<Bytes>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct MatchForm {
    /// 搜索类型：0 以文搜图，1 以图搜图，2 以文搜视频，3 以图搜视频，4 图文比对
    pub search_type: u8,
    /// 正向提示词
    pub positive: Option<String>,
    /// 反向提示词
    pub negative: Option<String>,
    /// 图文比对的文字
    pub text: Option<String>,
    /// 返回的结果数量
    pub top_n: Option<usize>,
    /// 正向提示词阈值，单位为百分比
    pub positive_threshold: Option<f32>,
    /// 反向提示词阈值，单位为百分比
    pub negative_threshold: Option<f32>,
    /// 以图搜索阈值，单位为百分比
    pub image_threshold: Option<f32>,
    /// 查询图片，以图搜索和图文比对时必填
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: Option<String>,
}

/// 一条搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchItem {
    pub url: String,
    pub path: String,
    /// 相似度 × 100，保留两位小数
    pub score: String,
    /// 在本次返回的结果中的相对置信度
    pub softmax_score: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

impl From<RankedMatch> for MatchItem {
    fn from(r: RankedMatch) -> Self {
        Self {
            url: r.item.url,
            path: r.item.path,
            score: format!("{:.2}", r.item.score * 100.),
            softmax_score: format!("{:.2}%", r.softmax * 100.),
            start_time: r.item.start_time,
            end_time: r.item.end_time,
        }
    }
}

/// 图文比对结果
#[derive(Debug, Serialize, ToSchema)]
pub struct PairResponse {
    pub score: String,
}

/// 扫描状态
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// 是否正在扫描
    pub status: bool,
    pub total_images: u64,
    pub total_video_frames: u64,
    /// 本次扫描需要处理的文件数
    pub scanning_files: usize,
    pub remain_files: usize,
    /// 扫描进度，范围 0 ~ 1
    pub progress: f64,
    /// 预计剩余时间，单位为秒
    pub remain_time: u64,
    pub enable_cache: bool,
}

impl StatusResponse {
    pub fn new(progress: &ScanProgress, enable_cache: bool) -> Self {
        Self {
            status: progress.is_scanning,
            total_images: progress.total_image_count,
            total_video_frames: progress.total_frame_count,
            scanning_files: progress.total_files,
            remain_files: progress.remain_files(),
            progress: progress.progress(),
            remain_time: progress.remain_time().as_secs(),
            enable_cache,
        }
    }
}

/// 开始扫描的结果
#[derive(Debug, Serialize, ToSchema)]
pub struct ScanResponse {
    pub status: String,
}

/// 清理缓存的结果
#[derive(Debug, Serialize, ToSchema)]
pub struct CleanCacheResponse {
    /// 清理的缓存条数
    pub count: u64,
}
