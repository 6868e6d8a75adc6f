use std::fmt;

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::db::{Database, crud};
use crate::matcher::Thresholds;
use crate::search::SearchKind;

/// 缓存键格式版本，修改键的构造方式时需要同步修改
const KEY_VERSION: &str = "mmsearch-cache-v1";

/// 一条排好序的匹配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    /// 素材访问地址
    pub url: String,
    /// 素材路径
    pub path: String,
    /// 相似度
    pub score: f32,
    /// 视频片段开始时间
    pub start_time: Option<f64>,
    /// 视频片段结束时间
    pub end_time: Option<f64>,
}

/// 查询内容
#[derive(Debug, Clone, Copy)]
pub enum QuerySource<'a> {
    /// 文字提示词
    Prompt { positive: &'a str, negative: &'a str },
    /// 上传图片的内容哈希
    Image(&'a blake3::Hash),
}

/// 由搜索类型、阈值、查询内容计算出的缓存键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(blake3::Hash);

impl CacheKey {
    /// 计算缓存键
    ///
    /// 所有字段都带长度前缀写入哈希，避免不同字段拼接后产生相同的输入。
    /// 阈值保留 4 位小数，与该搜索类型无关的阈值不参与计算。
    pub fn derive(kind: SearchKind, thresholds: &Thresholds, source: QuerySource<'_>) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut field = |data: &[u8]| {
            hasher.update(&(data.len() as u64).to_le_bytes());
            hasher.update(data);
        };

        field(KEY_VERSION.as_bytes());
        field(kind.tag().as_bytes());
        match source {
            QuerySource::Prompt { positive, negative } => {
                field(format!("{:.4}", thresholds.positive).as_bytes());
                field(format!("{:.4}", thresholds.negative).as_bytes());
                field(positive.as_bytes());
                field(negative.as_bytes());
            }
            QuerySource::Image(hash) => {
                field(format!("{:.4}", thresholds.image).as_bytes());
                field(hash.as_bytes());
            }
        }

        Self(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// 搜索结果缓存
///
/// 缓存只能整体清空，素材变化后旧的缓存不会自动失效。
#[derive(Clone)]
pub struct ResultCache {
    db: Database,
}

impl ResultCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 读取缓存，无法解析的缓存视为未命中
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<ScoredMatch>>> {
        let Some(data) = crud::get_cache(&self.db, &key.to_string()).await? else {
            return Ok(None);
        };
        match bincode::deserialize(&data) {
            Ok(result) => {
                debug!("命中缓存：{}", key);
                Ok(Some(result))
            }
            Err(e) => {
                warn!("缓存内容损坏，忽略：{} ({})", key, e);
                Ok(None)
            }
        }
    }

    /// 写入缓存，结果需要已按分数降序排列
    pub async fn put(&self, key: &CacheKey, result: &[ScoredMatch]) -> Result<()> {
        debug_assert!(result.windows(2).all(|w| w[0].score >= w[1].score));
        let data = bincode::serialize(result)?;
        crud::put_cache(&self.db, &key.to_string(), &data).await?;
        Ok(())
    }

    /// 清空所有缓存，返回清理的条数
    pub async fn clear(&self) -> Result<u64> {
        Ok(crud::clear_cache(&self.db).await?)
    }
}
