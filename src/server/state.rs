use std::sync::Arc;

use crate::cli::server::ServerCommand;
use crate::config::{ScanOptions, SearchOptions};
use crate::mediadb::MediaDB;

/// 应用状态
pub struct AppState {
    /// 素材库
    pub db: Arc<MediaDB>,
    /// 默认搜索参数
    pub search: SearchOptions,
    /// 扫描配置
    pub scan: ScanOptions,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(db: Arc<MediaDB>, opts: ServerCommand) -> Arc<Self> {
        Arc::new(AppState { db, search: opts.search, scan: opts.scan, token: opts.token })
    }
}
