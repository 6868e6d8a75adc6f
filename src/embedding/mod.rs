mod http;

use std::path::Path;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use thiserror::Error;

pub use self::http::HttpEmbedder;

/// 校验和长度，取 blake3 哈希的前 8 个字节
const CHECKSUM_LEN: usize = 8;

/// 视频帧特征序列，元素为 `(帧时间, 特征向量)`
pub type FrameStream<'a> = BoxStream<'a, Result<(f64, Embedding), EmbedError>>;

/// 特征提取失败的原因
#[derive(Debug, Error)]
pub enum EmbedError {
    /// 素材内容无法被模型处理，例如损坏的图片
    #[error("无法处理的内容: {0}")]
    Unprocessable(String),
    #[error("读取文件失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("请求特征提取服务失败: {0}")]
    Request(#[from] reqwest::Error),
    /// 服务返回了无法解析的数据
    #[error("特征提取服务返回数据有误: {0}")]
    Protocol(String),
}

/// 存储的特征向量无法还原
#[derive(Debug, Error, PartialEq)]
pub enum BlobError {
    #[error("长度有误: {0} 字节")]
    Length(usize),
    #[error("校验和不匹配")]
    Checksum,
    #[error("包含非有限数值")]
    NonFinite,
    #[error("维度不一致: 期望 {expected}，实际 {found}")]
    Dimension { expected: usize, found: usize },
}

/// 定长的特征向量
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// 创建特征向量，空向量或含有 NaN/Inf 的向量会被拒绝
    pub fn new(values: Vec<f32>) -> Option<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// 序列化为数据库中存储的格式：原始 f32 数据 + 校验和
    pub fn to_blob(&self) -> Vec<u8> {
        let data: &[u8] = bytemuck::cast_slice(&self.0);
        let mut blob = Vec::with_capacity(data.len() + CHECKSUM_LEN);
        blob.extend_from_slice(data);
        blob.extend_from_slice(&blake3::hash(data).as_bytes()[..CHECKSUM_LEN]);
        blob
    }

    /// 从数据库存储的格式还原特征向量
    pub fn from_blob(blob: &[u8]) -> Result<Self, BlobError> {
        if blob.len() <= CHECKSUM_LEN || (blob.len() - CHECKSUM_LEN) % size_of::<f32>() != 0 {
            return Err(BlobError::Length(blob.len()));
        }
        let (data, checksum) = blob.split_at(blob.len() - CHECKSUM_LEN);
        if &blake3::hash(data).as_bytes()[..CHECKSUM_LEN] != checksum {
            return Err(BlobError::Checksum);
        }
        // NOTE: blob 来自数据库，不保证按 f32 对齐，因此需要复制一次
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(data);
        Self::new(values).ok_or(BlobError::NonFinite)
    }

    /// 还原特征向量，并要求维度与 `dim` 一致
    pub fn from_blob_with_dim(blob: &[u8], dim: usize) -> Result<Self, BlobError> {
        let embedding = Self::from_blob(blob)?;
        if embedding.dim() != dim {
            return Err(BlobError::Dimension { expected: dim, found: embedding.dim() });
        }
        Ok(embedding)
    }
}

/// 特征提取模型的抽象
///
/// 模型推理通常由独立的服务完成，这里只关心输入和输出，
/// 批处理、设备选择、分词等细节都由实现方负责。
pub trait Embedder: Send + Sync {
    /// 计算一张图片的特征
    fn embed_image<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Embedding, EmbedError>>;

    /// 计算一段文字的特征
    fn embed_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Embedding, EmbedError>>;

    /// 按固定间隔抽帧并计算特征，帧时间升序
    fn embed_video_frames<'a>(&'a self, path: &'a Path) -> FrameStream<'a>;

    /// 两个特征之间的相似度，默认为余弦相似度
    fn similarity(&self, a: &Embedding, b: &Embedding) -> f32 {
        cosine_similarity(a.as_slice(), b.as_slice())
    }
}

/// 余弦相似度，任一向量为零向量时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0. || nb == 0. {
        return 0.;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_restores_embedding() {
        let embedding = Embedding::new(vec![0.25, -1.5, 3.0]).unwrap();
        let blob = embedding.to_blob();
        assert_eq!(blob.len(), 3 * 4 + CHECKSUM_LEN);
        assert_eq!(Embedding::from_blob(&blob).unwrap(), embedding);
    }

    #[test]
    fn test_blob_detects_corruption() {
        let mut blob = Embedding::new(vec![1.0, 2.0]).unwrap().to_blob();
        blob[0] ^= 0xff;
        assert_eq!(Embedding::from_blob(&blob), Err(BlobError::Checksum));
    }

    #[test]
    fn test_blob_rejects_bad_length() {
        assert_eq!(Embedding::from_blob(&[]), Err(BlobError::Length(0)));
        assert_eq!(Embedding::from_blob(&[0u8; 11]), Err(BlobError::Length(11)));
        // pickle 之类的旧格式数据同样会被识别为损坏
        assert!(Embedding::from_blob(b"\x80\x04\x95garbage-data").is_err());
    }

    #[test]
    fn test_blob_dimension_check() {
        let blob = Embedding::new(vec![1.0, 2.0, 3.0]).unwrap().to_blob();
        assert!(Embedding::from_blob_with_dim(&blob, 3).is_ok());
        assert_eq!(
            Embedding::from_blob_with_dim(&blob, 4),
            Err(BlobError::Dimension { expected: 4, found: 3 })
        );
    }

    #[test]
    fn test_new_rejects_invalid_values() {
        assert!(Embedding::new(vec![]).is_none());
        assert!(Embedding::new(vec![1.0, f32::NAN]).is_none());
        assert!(Embedding::new(vec![f32::INFINITY]).is_none());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1., 0.], &[1., 0.]) - 1.).abs() < 1e-6);
        assert!(cosine_similarity(&[1., 0.], &[0., 1.]).abs() < 1e-6);
        assert!((cosine_similarity(&[1., 0.], &[-2., 0.]) + 1.).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0., 0.], &[1., 1.]), 0.);
    }
}
