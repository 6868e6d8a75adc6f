use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cache::ResultCache;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::db::init_db;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        std::fs::create_dir_all(opts.conf_dir.path())?;
        let db = init_db(opts.conf_dir.database()).await?;
        info!("清理缓存中……");
        let count = ResultCache::new(db).clear().await?;
        info!("清理完成，共 {} 条", count);
        Ok(())
    }
}
