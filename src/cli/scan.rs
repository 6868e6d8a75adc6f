use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use tokio::time::{Duration, sleep};

use super::http_embedder;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, Opts, ScanOptions};
use crate::mediadb::MediaDBBuilder;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub embedder: EmbedderOptions,
}

impl SubCommandExtend for ScanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = http_embedder(&self.embedder)?;
        let db = Arc::new(MediaDBBuilder::new(opts.conf_dir.clone(), embedder).open().await?);

        let task = tokio::spawn({
            let db = db.clone();
            let scan = self.scan.clone();
            async move { db.scan(&scan).await }
        });

        let pb = ProgressBar::no_length().with_style(pb_style());
        while !task.is_finished() {
            let progress = db.progress();
            pb.set_length(progress.total_files as u64);
            pb.set_position(progress.scanned_count as u64);
            pb.set_message(format!(
                "图片 {}，视频帧 {}",
                progress.total_image_count, progress.total_frame_count
            ));
            sleep(Duration::from_millis(200)).await;
        }

        let stats = task.await??.ok_or_else(|| anyhow!("已有扫描任务在进行"))?;
        pb.finish_with_message("扫描完成");
        info!(
            "新增 {}，更新 {}，未变化 {}，跳过 {}，删除 {}",
            stats.new, stats.updated, stats.unchanged, stats.skipped, stats.deleted
        );

        Ok(())
    }
}
