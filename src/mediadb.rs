use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use log::{error, info, warn};

use crate::cache::{CacheKey, QuerySource, ResultCache};
use crate::config::{ConfDir, ScanOptions};
use crate::db::{Database, crud, init_db};
use crate::embedding::Embedder;
use crate::indexer::{Indexer, ScanProgress, ScanState, ScanStats};
use crate::search::{self, SearchKind, SearchOutput, SearchRequest};
use crate::{metrics, utils};

pub struct MediaDBBuilder {
    conf_dir: ConfDir,
    embedder: Arc<dyn Embedder>,
    cache: bool,
    max_results: usize,
}

impl MediaDBBuilder {
    pub fn new(conf_dir: ConfDir, embedder: Arc<dyn Embedder>) -> Self {
        Self { conf_dir, embedder, cache: true, max_results: 150 }
    }

    /// 是否使用搜索结果缓存
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// 写入缓存前保留的最大结果数量
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub async fn open(self) -> Result<MediaDB> {
        std::fs::create_dir_all(self.conf_dir.path())?;
        let db = init_db(self.conf_dir.database()).await?;

        let images = crud::count_images(&db).await?;
        let frames = crud::count_frames(&db).await?;
        info!("已加载 {} 张图片，{} 个视频帧", images, frames);

        Ok(MediaDB {
            indexer: Indexer::new(db.clone(), self.embedder.clone(), self.conf_dir.checkpoint()),
            cache: ResultCache::new(db.clone()),
            state: Arc::new(ScanState::new(images, frames)),
            conf_dir: self.conf_dir,
            db,
            embedder: self.embedder,
            use_cache: self.cache,
            max_results: self.max_results,
        })
    }
}

/// 图片与视频素材库
pub struct MediaDB {
    conf_dir: ConfDir,
    db: Database,
    embedder: Arc<dyn Embedder>,
    indexer: Indexer,
    cache: ResultCache,
    state: Arc<ScanState>,
    use_cache: bool,
    max_results: usize,
}

impl MediaDB {
    pub fn conf_dir(&self) -> &ConfDir {
        &self.conf_dir
    }

    pub fn cache_enabled(&self) -> bool {
        self.use_cache
    }

    /// 扫描进度
    pub fn progress(&self) -> ScanProgress {
        self.state.snapshot()
    }

    /// 在当前任务中扫描，已有扫描在进行时返回 None
    pub async fn scan(&self, opts: &ScanOptions) -> Result<Option<ScanStats>> {
        let Some(guard) = self.state.try_begin() else {
            return Ok(None);
        };
        let stats = self.indexer.run_scan(&guard, opts).await?;
        Ok(Some(stats))
    }

    /// 在后台开始扫描，已有扫描在进行时返回 false
    pub fn start_scan(self: &Arc<Self>, opts: ScanOptions) -> bool {
        let Some(guard) = self.state.try_begin() else {
            return false;
        };
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.indexer.run_scan(&guard, &opts).await {
                error!("扫描失败：{:#}", e);
            }
        });
        true
    }

    /// 清空搜索结果缓存
    pub async fn clear_cache(&self) -> Result<u64> {
        let count = self.cache.clear().await?;
        info!("已清理 {} 条缓存", count);
        Ok(count)
    }

    /// 根据 ID 获取图片路径
    pub async fn image_path(&self, id: i64) -> Result<Option<String>> {
        Ok(crud::find_image_by_id(&self.db, id).await?.map(|record| record.path))
    }

    /// 根据视频帧 ID 获取视频路径
    pub async fn video_path(&self, frame_id: i64) -> Result<Option<String>> {
        Ok(crud::find_frame_by_id(&self.db, frame_id).await?.map(|record| record.path))
    }

    /// 搜索素材
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutput> {
        request.validate()?;
        let start = Instant::now();

        if let (SearchKind::TextImagePair, Some(image)) = (request.kind, &request.image) {
            let score = search::pair_score(&*self.embedder, &request.positive, image).await?;
            metrics::observe_search_duration(request.kind.tag(), false, start.elapsed().as_secs_f64());
            return Ok(SearchOutput::Pair { score });
        }

        let key = match self.use_cache && request.kind.is_cacheable() {
            true => Some(self.cache_key(request)?),
            false => None,
        };

        if let Some(key) = &key {
            let cached = self.cache.get(key).await.unwrap_or_else(|e| {
                warn!("读取缓存失败：{}", e);
                None
            });
            metrics::inc_cache(cached.is_some());
            if let Some(list) = cached {
                metrics::observe_search_duration(request.kind.tag(), true, start.elapsed().as_secs_f64());
                return Ok(SearchOutput::Ranked(search::rank(list, request.top_n)));
            }
        }

        let query = search::build_query(&*self.embedder, request).await?;
        let mut list = match request.kind.is_video() {
            true => search::search_videos(&self.db, &self.embedder, query).await?,
            false => search::search_images(&self.db, &self.embedder, query).await?,
        };
        list.truncate(self.max_results);

        if let Some(key) = &key {
            if let Err(e) = self.cache.put(key, &list).await {
                warn!("写入缓存失败：{}", e);
            }
        }

        metrics::observe_search_duration(request.kind.tag(), false, start.elapsed().as_secs_f64());
        Ok(SearchOutput::Ranked(search::rank(list, request.top_n)))
    }

    fn cache_key(&self, request: &SearchRequest) -> Result<CacheKey> {
        let key = match (&request.image, request.kind) {
            (Some(image), SearchKind::ImageToImage | SearchKind::ImageToVideo) => {
                let hash = utils::hash_file(image)?;
                CacheKey::derive(request.kind, &request.thresholds, QuerySource::Image(&hash))
            }
            _ => CacheKey::derive(
                request.kind,
                &request.thresholds,
                QuerySource::Prompt { positive: &request.positive, negative: &request.negative },
            ),
        };
        Ok(key)
    }
}
