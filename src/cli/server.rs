use std::sync::Arc;

use clap::Parser;
use log::info;
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;

use super::http_embedder;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, ScanOptions, SearchOptions};
use crate::mediadb::MediaDBBuilder;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub scan: ScanOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// 启动后立即开始扫描
    #[arg(long)]
    pub auto_scan: bool,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let embedder = http_embedder(&self.embedder)?;
        let db = MediaDBBuilder::new(opts.conf_dir.clone(), embedder)
            .cache(!self.search.no_cache)
            .max_results(self.search.max_results)
            .open()
            .await?;
        let db = Arc::new(db);

        let mut self_clone = self.clone();
        if self_clone.token.is_empty() {
            self_clone.token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", self_clone.token);
        }

        if self.auto_scan && db.start_scan(self.scan.clone()) {
            info!("已在后台开始扫描");
        }

        // 创建应用状态
        let state = server::AppState::new(db, self_clone);

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
