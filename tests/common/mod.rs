#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use mmsearch::config::{ConfDir, ScanOptions};
use mmsearch::embedding::{EmbedError, Embedder, Embedding, FrameStream};
use mmsearch::{MediaDB, MediaDBBuilder};
use tempfile::TempDir;

/// 测试用的特征提取器
///
/// 图片文件的内容即为特征，例如 `1,0,0`；视频文件每行一帧，格式为 `时间:特征`；
/// 文字直接按特征解析。内容为 `bad` 时视为无法处理。
#[derive(Default)]
pub struct MockEmbedder {
    pub image_calls: AtomicUsize,
    pub video_calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst) + self.video_calls.load(Ordering::SeqCst)
    }
}

fn parse(text: &str) -> Result<Embedding, EmbedError> {
    let text = text.trim();
    if text == "bad" {
        return Err(EmbedError::Unprocessable(text.to_string()));
    }
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EmbedError::Protocol(e.to_string()))?;
    Embedding::new(values).ok_or_else(|| EmbedError::Protocol("empty".to_string()))
}

fn parse_frame(line: &str) -> Result<(f64, Embedding), EmbedError> {
    let (time, values) =
        line.split_once(':').ok_or_else(|| EmbedError::Unprocessable(line.to_string()))?;
    let time = time.trim().parse().map_err(|_| EmbedError::Protocol(line.to_string()))?;
    Ok((time, parse(values)?))
}

impl Embedder for MockEmbedder {
    fn embed_image<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Embedding, EmbedError>> {
        async move {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            parse(&tokio::fs::read_to_string(path).await?)
        }
        .boxed()
    }

    fn embed_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Embedding, EmbedError>> {
        async move { parse(text) }.boxed()
    }

    fn embed_video_frames<'a>(&'a self, path: &'a Path) -> FrameStream<'a> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        let path = path.to_path_buf();
        stream::once(async move { tokio::fs::read_to_string(path).await })
            .flat_map(|content| match content {
                Ok(content) => {
                    let frames = content
                        .lines()
                        .filter(|line| !line.trim().is_empty())
                        .map(parse_frame)
                        .collect::<Vec<_>>();
                    stream::iter(frames).boxed()
                }
                Err(e) => stream::iter([Err(EmbedError::Io(e))]).boxed(),
            })
            .boxed()
    }
}

/// 一个临时的素材目录和配置目录
pub struct Fixture {
    pub assets: TempDir,
    pub conf: TempDir,
    pub embedder: Arc<MockEmbedder>,
}

impl Fixture {
    pub fn new() -> Result<Self> {
        Ok(Self {
            assets: tempfile::tempdir()?,
            conf: tempfile::tempdir()?,
            embedder: Arc::new(MockEmbedder::default()),
        })
    }

    pub fn conf_dir(&self) -> Result<ConfDir> {
        Ok(ConfDir::from_str(&self.conf.path().to_string_lossy())?)
    }

    pub async fn open(&self, cache: bool) -> Result<MediaDB> {
        MediaDBBuilder::new(self.conf_dir()?, self.embedder.clone()).cache(cache).open().await
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.assets.path().join(name)
    }

    /// 写入素材文件，返回其路径字符串
    pub fn write(&self, name: &str, content: &str) -> Result<String> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// 修改文件内容，并确保修改时间发生变化
    pub fn modify(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path(name);
        std::fs::write(&path, content)?;
        let file = File::options().write(true).open(&path)?;
        file.set_modified(SystemTime::now() + Duration::from_secs(60))?;
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            assets: vec![self.assets.path().to_path_buf()],
            skip: vec![],
            image_ext: "jpg,png".to_string(),
            video_ext: "mp4".to_string(),
        }
    }
}
