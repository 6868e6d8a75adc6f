use rayon::prelude::*;

use crate::embedding::Embedding;

/// 相似度阈值，单位与相似度一致
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// 文字搜索时，相似度高于此值才显示
    pub positive: f32,
    /// 文字过滤时，与反向提示词的相似度低于此值才显示
    pub negative: f32,
    /// 以图搜索时，相似度高于此值才显示
    pub image: f32,
}

impl Thresholds {
    /// 从百分比形式的阈值创建
    pub fn from_percent(positive: f32, negative: f32, image: f32) -> Self {
        Self { positive: positive / 100., negative: negative / 100., image: image / 100. }
    }
}

/// 一次匹配所需的查询特征和阈值
#[derive(Debug, Clone)]
pub struct MatchQuery {
    /// 正向查询特征
    pub positive: Embedding,
    /// 反向查询特征，以图搜索时为空
    pub negative: Option<Embedding>,
    pub positive_threshold: f32,
    pub negative_threshold: f32,
}

impl MatchQuery {
    /// 文字查询，使用正反两个阈值
    pub fn text(positive: Embedding, negative: Option<Embedding>, thresholds: &Thresholds) -> Self {
        Self {
            positive,
            negative,
            positive_threshold: thresholds.positive,
            negative_threshold: thresholds.negative,
        }
    }

    /// 以图搜索，只使用图片阈值，不做反向过滤
    pub fn image(positive: Embedding, thresholds: &Thresholds) -> Self {
        Self {
            positive,
            negative: None,
            positive_threshold: thresholds.image,
            negative_threshold: f32::INFINITY,
        }
    }

    pub fn dim(&self) -> usize {
        self.positive.dim()
    }
}

/// 计算每个候选特征与查询的匹配分数
///
/// 正向相似度严格大于正向阈值、且（存在反向特征时）反向相似度严格小于反向阈值的候选，
/// 返回其正向相似度，否则返回 `None`。
pub fn match_batch<F>(query: &MatchQuery, candidates: &[Embedding], similarity: F) -> Vec<Option<f32>>
where
    F: Fn(&Embedding, &Embedding) -> f32 + Sync,
{
    candidates
        .par_iter()
        .map(|candidate| {
            let score = similarity(&query.positive, candidate);
            // NaN 一律视为不匹配
            if !(score > query.positive_threshold) {
                return None;
            }
            if let Some(negative) = &query.negative {
                if !(similarity(negative, candidate) < query.negative_threshold) {
                    return None;
                }
            }
            Some(score)
        })
        .collect()
}

/// softmax，结果之和为 1，空输入返回空
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = scores.iter().map(|s| (s - max).exp()).collect::<Vec<_>>();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}
