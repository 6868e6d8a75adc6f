use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::spawn_blocking;

use crate::cache::ScoredMatch;
use crate::db::{Database, crud};
use crate::embedding::{BlobError, EmbedError, Embedder, Embedding};
use crate::matcher::{MatchQuery, Thresholds, match_batch, softmax};
use crate::segment::{get_index_pairs, segment_bounds};

/// 查询参数有误，或查询内容无法处理
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("无效的查询: {0}")]
    InvalidQuery(String),
    #[error("无法处理查询图片: {0}")]
    Unprocessable(String),
}

/// 搜索类型，数值与 HTTP 接口的 `search_type` 一致
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchKind {
    /// 以文搜图
    TextToImage = 0,
    /// 以图搜图
    ImageToImage = 1,
    /// 以文搜视频
    TextToVideo = 2,
    /// 以图搜视频
    ImageToVideo = 3,
    /// 图文比对
    TextImagePair = 4,
}

impl SearchKind {
    /// 用于缓存键与指标标签的名称
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TextToImage => "text_to_image",
            Self::ImageToImage => "image_to_image",
            Self::TextToVideo => "text_to_video",
            Self::ImageToVideo => "image_to_video",
            Self::TextImagePair => "text_image_pair",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::TextToVideo | Self::ImageToVideo)
    }

    /// 是否需要上传查询图片
    pub fn is_image_query(&self) -> bool {
        matches!(self, Self::ImageToImage | Self::ImageToVideo | Self::TextImagePair)
    }

    /// 图文比对只返回一个分数，不缓存
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::TextImagePair)
    }
}

impl TryFrom<u8> for SearchKind {
    type Error = SearchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::TextToImage),
            1 => Ok(Self::ImageToImage),
            2 => Ok(Self::TextToVideo),
            3 => Ok(Self::ImageToVideo),
            4 => Ok(Self::TextImagePair),
            _ => Err(SearchError::InvalidQuery(format!("未知的搜索类型: {}", value))),
        }
    }
}

/// 一次搜索请求
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub kind: SearchKind,
    /// 正向提示词，图文比对时为比对的文字
    pub positive: String,
    /// 反向提示词，可以为空
    pub negative: String,
    /// 查询图片路径
    pub image: Option<PathBuf>,
    pub thresholds: Thresholds,
    /// 返回的结果数量
    pub top_n: usize,
}

impl SearchRequest {
    /// 检查请求所需的参数是否齐全
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.kind.is_image_query() && self.image.is_none() {
            return Err(SearchError::InvalidQuery("缺少查询图片".to_string()));
        }
        let needs_text = !matches!(self.kind, SearchKind::ImageToImage | SearchKind::ImageToVideo);
        if needs_text && self.positive.trim().is_empty() {
            return Err(SearchError::InvalidQuery("缺少提示词".to_string()));
        }
        Ok(())
    }
}

/// 截断后的结果，附带 softmax 置信度
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    #[serde(flatten)]
    pub item: ScoredMatch,
    pub softmax: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutput {
    Ranked(Vec<RankedMatch>),
    /// 图文比对的相似度
    Pair { score: f32 },
}

/// 取前 `top_n` 个结果，并在这部分结果上计算 softmax
pub fn rank(mut list: Vec<ScoredMatch>, top_n: usize) -> Vec<RankedMatch> {
    list.truncate(top_n);
    let scores = list.iter().map(|item| item.score).collect::<Vec<_>>();
    list.into_iter()
        .zip(softmax(&scores))
        .map(|(item, softmax)| RankedMatch { item, softmax })
        .collect()
}

/// 计算查询特征
pub async fn build_query(embedder: &dyn Embedder, request: &SearchRequest) -> Result<MatchQuery> {
    match request.kind {
        SearchKind::ImageToImage | SearchKind::ImageToVideo => {
            let image = request
                .image
                .as_deref()
                .ok_or_else(|| SearchError::InvalidQuery("缺少查询图片".to_string()))?;
            let positive = embedder.embed_image(image).await.map_err(query_image_error)?;
            Ok(MatchQuery::image(positive, &request.thresholds))
        }
        _ => {
            let positive = embedder.embed_text(&request.positive).await?;
            let negative = match request.negative.trim() {
                "" => None,
                text => Some(embedder.embed_text(text).await?),
            };
            Ok(MatchQuery::text(positive, negative, &request.thresholds))
        }
    }
}

/// 图文比对
pub async fn pair_score(embedder: &dyn Embedder, text: &str, image: &Path) -> Result<f32> {
    let text = embedder.embed_text(text).await?;
    let image = embedder.embed_image(image).await.map_err(query_image_error)?;
    Ok(embedder.similarity(&text, &image))
}

fn query_image_error(e: EmbedError) -> anyhow::Error {
    match e {
        EmbedError::Unprocessable(msg) => SearchError::Unprocessable(msg).into(),
        e => e.into(),
    }
}

/// 还原候选特征：结构损坏的返回错误，需要删除；维度与查询不一致的返回 `None`，只跳过
fn decode_candidate(blob: &[u8], dim: usize) -> Result<Option<Embedding>, BlobError> {
    match Embedding::from_blob_with_dim(blob, dim) {
        Ok(embedding) => Ok(Some(embedding)),
        Err(BlobError::Dimension { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// 所有记录的维度都与查询不一致时拒绝查询，部分不一致时跳过这些记录
fn check_dimension(dim: usize, matched: usize, mismatched: usize) -> Result<(), SearchError> {
    if mismatched == 0 {
        return Ok(());
    }
    if matched == 0 {
        return Err(SearchError::InvalidQuery(format!("查询特征维度 {} 与已索引的特征不一致", dim)));
    }
    warn!("跳过 {} 条维度与查询（{}）不一致的记录", mismatched, dim);
    Ok(())
}

/// 在所有图片中搜索，结果按分数降序
pub async fn search_images(
    db: &Database,
    embedder: &Arc<dyn Embedder>,
    query: MatchQuery,
) -> Result<Vec<ScoredMatch>> {
    let records = crud::find_all_images(db).await?;

    let mut ids = Vec::with_capacity(records.len());
    let mut paths = Vec::with_capacity(records.len());
    let mut candidates = Vec::with_capacity(records.len());
    let mut mismatched = 0;
    for record in records {
        match decode_candidate(&record.embedding, query.dim()) {
            Ok(Some(embedding)) => {
                ids.push(record.id);
                paths.push(record.path);
                candidates.push(embedding);
            }
            Ok(None) => mismatched += 1,
            Err(e) => {
                warn!("图片特征损坏，已删除记录：{} ({})", record.path, e);
                crud::delete_image(db, record.id).await?;
            }
        }
    }
    check_dimension(query.dim(), candidates.len(), mismatched)?;

    let embedder = embedder.clone();
    let scores = spawn_blocking(move || {
        match_batch(&query, &candidates, |a, b| embedder.similarity(a, b))
    })
    .await?;

    let mut result = ids
        .into_iter()
        .zip(paths)
        .zip(scores)
        .filter_map(|((id, path), score)| {
            Some(ScoredMatch {
                url: format!("api/get_image/{}", id),
                path,
                score: score?,
                start_time: None,
                end_time: None,
            })
        })
        .collect::<Vec<_>>();
    sort_by_score(&mut result);

    Ok(result)
}

/// 一个视频的所有有效帧
struct VideoFrames {
    path: String,
    first_id: i64,
    times: Vec<f64>,
    embeddings: Vec<Embedding>,
}

/// 在所有视频中搜索，每个匹配的片段为一条结果，按分数降序
pub async fn search_videos(
    db: &Database,
    embedder: &Arc<dyn Embedder>,
    query: MatchQuery,
) -> Result<Vec<ScoredMatch>> {
    let mut videos = vec![];
    let (mut matched, mut mismatched) = (0, 0);
    for path in crud::find_video_paths(db).await? {
        let mut video: Option<VideoFrames> = None;
        for frame in crud::find_frames_by_path(db, &path).await? {
            match decode_candidate(&frame.embedding, query.dim()) {
                Ok(Some(embedding)) => {
                    // 链接指向第一个有效帧，损坏的帧已被删除
                    let video = video.get_or_insert_with(|| VideoFrames {
                        path: path.clone(),
                        first_id: frame.id,
                        times: vec![],
                        embeddings: vec![],
                    });
                    video.times.push(frame.frame_time);
                    video.embeddings.push(embedding);
                    matched += 1;
                }
                Ok(None) => mismatched += 1,
                Err(e) => {
                    warn!("视频帧特征损坏，已删除记录：{} @ {}s ({})", frame.path, frame.frame_time, e);
                    crud::delete_frame(db, frame.id).await?;
                }
            }
        }
        videos.extend(video);
    }
    check_dimension(query.dim(), matched, mismatched)?;

    let embedder = embedder.clone();
    let mut result = spawn_blocking(move || {
        let mut result = vec![];
        for video in videos {
            let scores = match_batch(&query, &video.embeddings, |a, b| embedder.similarity(a, b));
            let hits = scores.iter().map(Option::is_some).collect::<Vec<_>>();
            for (first, last) in get_index_pairs(&hits) {
                let score = scores[first..=last]
                    .iter()
                    .flatten()
                    .copied()
                    .fold(f32::NEG_INFINITY, f32::max);
                let (start, end) = segment_bounds(&video.times, (first, last));
                result.push(ScoredMatch {
                    url: format!("api/get_video/{}#t={:.1},{:.1}", video.first_id, start, end),
                    path: video.path.clone(),
                    score,
                    start_time: Some(start),
                    end_time: Some(end),
                });
            }
        }
        result
    })
    .await?;
    sort_by_score(&mut result);

    Ok(result)
}

fn sort_by_score(list: &mut [ScoredMatch]) {
    list.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(score: f32) -> ScoredMatch {
        ScoredMatch {
            url: String::new(),
            path: format!("{}", score),
            score,
            start_time: None,
            end_time: None,
        }
    }

    fn request(kind: SearchKind, positive: &str, image: Option<&str>) -> SearchRequest {
        SearchRequest {
            kind,
            positive: positive.to_string(),
            negative: String::new(),
            image: image.map(PathBuf::from),
            thresholds: Thresholds::from_percent(10., 10., 85.),
            top_n: 6,
        }
    }

    #[test]
    fn test_kind_from_tag() {
        assert_eq!(SearchKind::try_from(0).unwrap(), SearchKind::TextToImage);
        assert_eq!(SearchKind::try_from(4).unwrap(), SearchKind::TextImagePair);
        assert!(matches!(SearchKind::try_from(5), Err(SearchError::InvalidQuery(_))));
    }

    #[test]
    fn test_validate() {
        assert!(request(SearchKind::TextToImage, "cat", None).validate().is_ok());
        assert!(request(SearchKind::TextToVideo, "  ", None).validate().is_err());
        assert!(request(SearchKind::ImageToImage, "", None).validate().is_err());
        assert!(request(SearchKind::ImageToVideo, "", Some("a.jpg")).validate().is_ok());
        assert!(request(SearchKind::TextImagePair, "", Some("a.jpg")).validate().is_err());
        assert!(request(SearchKind::TextImagePair, "cat", Some("a.jpg")).validate().is_ok());
    }

    #[test]
    fn test_rank_truncates_before_softmax() {
        let list = vec![item(0.9), item(0.8), item(0.7), item(0.6), item(0.5)];
        let ranked = rank(list, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].item.score, 0.9);
        let sum: f32 = ranked.iter().map(|r| r.softmax).sum();
        assert!((sum - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_rank_keeps_order() {
        let ranked = rank(vec![item(0.3), item(0.2)], 6);
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].softmax > ranked[1].softmax);
    }

    #[test]
    fn test_decode_candidate() {
        let blob = Embedding::new(vec![1.0, 0.0, 0.0]).unwrap().to_blob();
        assert!(decode_candidate(&blob, 3).unwrap().is_some());
        // 维度不一致只跳过，不视为损坏
        assert!(decode_candidate(&blob, 2).unwrap().is_none());
        assert_eq!(decode_candidate(&[0, 1], 3), Err(BlobError::Length(2)));
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(3, 5, 0).is_ok());
        assert!(check_dimension(3, 0, 0).is_ok());
        assert!(check_dimension(3, 4, 1).is_ok());
        assert!(matches!(check_dimension(2, 0, 5), Err(SearchError::InvalidQuery(_))));
    }
}
