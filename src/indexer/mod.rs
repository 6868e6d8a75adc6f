mod progress;
mod worklist;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use futures::TryStreamExt;
use log::{debug, info, warn};
use regex::Regex;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

pub use self::progress::*;
pub use self::worklist::*;
use crate::config::ScanOptions;
use crate::db::{Database, crud};
use crate::embedding::{EmbedError, Embedder, Embedding};
use crate::{metrics, utils};

/// 素材类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Video,
}

/// 根据后缀名判断素材类型，不区分大小写
#[derive(Debug, Clone)]
pub struct AssetFilter {
    image: Regex,
    video: Regex,
}

impl AssetFilter {
    /// 由逗号分隔的后缀名列表创建
    pub fn new(image_ext: &str, video_ext: &str) -> Result<Self> {
        Ok(Self { image: suffix_regex(image_ext)?, video: suffix_regex(video_ext)? })
    }

    pub fn kind(&self, path: &Path) -> Option<AssetKind> {
        let ext = path.extension()?.to_str()?;
        if self.image.is_match(ext) {
            Some(AssetKind::Image)
        } else if self.video.is_match(ext) {
            Some(AssetKind::Video)
        } else {
            None
        }
    }
}

fn suffix_regex(list: &str) -> Result<Regex> {
    let alternatives = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!("(?i)^({})$", alternatives))?)
}

fn is_skipped(path: &str, skip: &[String]) -> bool {
    skip.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// 单个文件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    New,
    Updated,
    Unchanged,
    /// 内容无法处理或提取特征失败
    Skipped,
    /// 文件在扫描过程中被删除
    Vanished,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped | Self::Vanished => "skipped",
        }
    }
}

/// 一次扫描的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
    /// 清理掉的图片和视频数量
    pub deleted: u64,
    /// 是否从断点继续
    pub resumed: bool,
}

impl ScanStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::New => self.new += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Skipped | Outcome::Vanished => self.skipped += 1,
        }
        metrics::inc_scanned(outcome.label(), 1);
    }
}

/// 增量扫描素材目录，为新增或修改过的文件计算特征
pub struct Indexer {
    db: Database,
    embedder: Arc<dyn Embedder>,
    checkpoint: PathBuf,
}

impl Indexer {
    pub fn new(db: Database, embedder: Arc<dyn Embedder>, checkpoint: impl Into<PathBuf>) -> Self {
        Self { db, embedder, checkpoint: checkpoint.into() }
    }

    /// 执行一次完整的扫描
    ///
    /// 存在断点时只处理断点中剩余的文件，且不清理数据库中的过期记录。
    pub async fn run_scan(&self, guard: &ScanGuard, opts: &ScanOptions) -> Result<ScanStats> {
        if opts.assets.is_empty() {
            bail!("未指定素材目录");
        }
        let filter = AssetFilter::new(&opts.image_ext, &opts.video_ext)?;
        let start = Instant::now();
        let mut stats = ScanStats::default();

        let mut worklist = match ScanWorklist::load(&self.checkpoint)? {
            Some(mut worklist) => {
                worklist.retain(|path| !is_skipped(path, &opts.skip));
                info!("从断点继续扫描，剩余 {} 个文件", worklist.len());
                stats.resumed = true;
                worklist
            }
            None => {
                info!("开始扫描素材目录：{:?}", opts.assets);
                let files = scan_dirs(opts.assets.clone(), opts.skip.clone(), filter.clone()).await?;
                let mut worklist = ScanWorklist::new(&self.checkpoint, files);
                worklist.save()?;
                stats.deleted = self.prune_stale(&worklist, &opts.skip).await?;
                worklist
            }
        };
        self.refresh_totals(guard).await?;

        guard.set_total_files(worklist.len());
        for path in worklist.snapshot() {
            let outcome = match filter.kind(Path::new(&path)) {
                Some(AssetKind::Image) => self.process_image(&path, guard).await,
                Some(AssetKind::Video) => self.process_video(&path, guard).await,
                // 断点中的文件可能已不满足当前的后缀名设置
                None => Ok(Outcome::Skipped),
            };
            let outcome = outcome.unwrap_or_else(|e| {
                warn!("处理文件失败，跳过：{} ({:#})", path, e);
                Outcome::Skipped
            });
            stats.record(outcome);

            if let Err(e) = worklist.complete(&path) {
                warn!("保存断点失败：{}", e);
            }
            guard.inc_scanned();
        }

        worklist.discard()?;
        info!(
            "扫描完成，用时 {:.2}s：新增 {}，更新 {}，未变化 {}，跳过 {}，删除 {}",
            start.elapsed().as_secs_f64(),
            stats.new,
            stats.updated,
            stats.unchanged,
            stats.skipped,
            stats.deleted
        );

        Ok(stats)
    }

    /// 删除已不存在或被跳过的素材记录
    async fn prune_stale(&self, worklist: &ScanWorklist, skip: &[String]) -> Result<u64> {
        let mut deleted = 0;
        let is_stale = |path: &str| !worklist.contains(path) || is_skipped(path, skip);

        for record in crud::find_image_paths(&self.db).await? {
            if is_stale(&record.path) {
                info!("删除图片：{}", record.path);
                crud::delete_image(&self.db, record.id).await?;
                deleted += 1;
            }
        }
        for path in crud::find_video_paths(&self.db).await? {
            if is_stale(&path) {
                info!("删除视频：{}", path);
                crud::delete_frames_by_path(&self.db, &path).await?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            metrics::inc_scanned("deleted", deleted);
        }
        Ok(deleted)
    }

    async fn process_image(&self, path: &str, guard: &ScanGuard) -> Result<Outcome> {
        let Some(modify_time) = file_modify_time(path).await? else {
            return Ok(Outcome::Vanished);
        };

        let record = crud::find_image_by_path(&self.db, path).await?;
        if record.as_ref().is_some_and(|r| r.modify_time == modify_time) {
            debug!("图片未变化：{}", path);
            return Ok(Outcome::Unchanged);
        }

        let embedding = match self.embedder.embed_image(Path::new(path)).await {
            Ok(embedding) => embedding,
            Err(e) => return skip_reason(path, e),
        };
        crud::upsert_image(&self.db, path, modify_time, &embedding.to_blob()).await?;
        self.refresh_totals(guard).await?;

        if record.is_some() {
            info!("更新图片：{}", path);
            Ok(Outcome::Updated)
        } else {
            info!("新增图片：{}", path);
            Ok(Outcome::New)
        }
    }

    async fn process_video(&self, path: &str, guard: &ScanGuard) -> Result<Outcome> {
        let Some(modify_time) = file_modify_time(path).await? else {
            return Ok(Outcome::Vanished);
        };

        let stored = crud::find_video_modify_time(&self.db, path).await?;
        if stored == Some(modify_time) {
            debug!("视频未变化：{}", path);
            return Ok(Outcome::Unchanged);
        }

        // 先取得所有帧，失败时保留旧的记录
        let frames: Vec<(f64, Embedding)> =
            match self.embedder.embed_video_frames(Path::new(path)).try_collect().await {
                Ok(frames) => frames,
                Err(e) => return skip_reason(path, e),
            };
        if frames.is_empty() {
            warn!("视频没有可用的帧，跳过：{}", path);
            return Ok(Outcome::Skipped);
        }

        let mut tx = self.db.begin().await?;
        crud::delete_frames_by_path(&mut *tx, path).await?;
        for (frame_time, embedding) in &frames {
            crud::insert_frame(&mut *tx, path, *frame_time, modify_time, &embedding.to_blob())
                .await?;
        }
        tx.commit().await?;
        self.refresh_totals(guard).await?;

        if stored.is_some() {
            info!("更新视频：{} ({} 帧)", path, frames.len());
            Ok(Outcome::Updated)
        } else {
            info!("新增视频：{} ({} 帧)", path, frames.len());
            Ok(Outcome::New)
        }
    }

    async fn refresh_totals(&self, guard: &ScanGuard) -> Result<()> {
        let images = crud::count_images(&self.db).await?;
        let frames = crud::count_frames(&self.db).await?;
        guard.set_totals(images, frames);
        Ok(())
    }
}

/// 文件的修改时间，文件不存在时返回 None
async fn file_modify_time(path: &str) -> Result<Option<i64>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(utils::modify_time(&metadata)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 提取特征失败时决定如何处理该文件
fn skip_reason(path: &str, e: EmbedError) -> Result<Outcome> {
    match e {
        EmbedError::Unprocessable(msg) => {
            warn!("无法处理的文件，跳过：{} ({})", path, msg);
            Ok(Outcome::Skipped)
        }
        EmbedError::Io(e) if e.kind() == ErrorKind::NotFound => Ok(Outcome::Vanished),
        e => Err(e.into()),
    }
}

/// 遍历素材目录，返回所有符合后缀名的文件
async fn scan_dirs(roots: Vec<PathBuf>, skip: Vec<String>, filter: AssetFilter) -> Result<Vec<String>> {
    let files = spawn_blocking(move || {
        let mut files = vec![];
        for root in &roots {
            let entries = WalkDir::new(root).into_iter().filter_entry(|entry| {
                entry.path().to_str().is_none_or(|path| !is_skipped(path, &skip))
            });
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("无法读取目录项：{}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() || filter.kind(entry.path()).is_none() {
                    continue;
                }
                match entry.path().to_str() {
                    Some(path) => files.push(path.to_string()),
                    None => warn!("路径不是有效的 UTF-8，跳过：{}", entry.path().display()),
                }
            }
        }
        files
    })
    .await?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_filter() -> Result<()> {
        let filter = AssetFilter::new("jpg,png", "mp4")?;
        assert_eq!(filter.kind(Path::new("/a/b.JPG")), Some(AssetKind::Image));
        assert_eq!(filter.kind(Path::new("/a/b.png")), Some(AssetKind::Image));
        assert_eq!(filter.kind(Path::new("/a/b.Mp4")), Some(AssetKind::Video));
        assert_eq!(filter.kind(Path::new("/a/b.jpeg")), None);
        assert_eq!(filter.kind(Path::new("/a/mp4")), None);
        assert_eq!(filter.kind(Path::new("/a/b.xjpg")), None);
        Ok(())
    }

    #[test]
    fn test_skip_prefix() {
        let skip = vec!["/data/private".to_string()];
        assert!(is_skipped("/data/private/a.jpg", &skip));
        assert!(!is_skipped("/data/public/a.jpg", &skip));
        assert!(!is_skipped("/data/a.jpg", &[]));
    }
}
