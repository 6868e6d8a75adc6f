use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use super::http_embedder;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, Opts, SearchOptions};
use crate::mediadb::MediaDBBuilder;
use crate::search::{RankedMatch, SearchKind, SearchOutput, SearchRequest};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 搜索类型
    #[arg(short, long, value_enum, default_value_t = SearchKind::TextToImage)]
    pub kind: SearchKind,
    /// 正向提示词，图文比对时为比对的文字
    #[arg(default_value = "")]
    pub prompt: String,
    /// 反向提示词
    #[arg(short, long, default_value = "")]
    pub negative: String,
    /// 查询图片路径
    #[arg(short, long)]
    pub image: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = http_embedder(&self.embedder)?;
        let db = MediaDBBuilder::new(opts.conf_dir.clone(), embedder)
            .cache(!self.search.no_cache)
            .max_results(self.search.max_results)
            .open()
            .await?;

        let request = SearchRequest {
            kind: self.kind,
            positive: self.prompt.clone(),
            negative: self.negative.clone(),
            image: self.image.clone(),
            thresholds: self.search.thresholds(),
            top_n: self.search.count,
        };

        match db.search(&request).await? {
            SearchOutput::Ranked(result) => print_result(&result, self.output_format),
            SearchOutput::Pair { score } => {
                println!("{:.2}", score * 100.);
                Ok(())
            }
        }
    }
}

fn print_result(result: &[RankedMatch], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for r in result {
                let item = &r.item;
                match (item.start_time, item.end_time) {
                    (Some(start), Some(end)) => println!(
                        "{:.2}\t{:.2}%\t{}\t{:.1}-{:.1}",
                        item.score * 100.,
                        r.softmax * 100.,
                        item.path,
                        start,
                        end
                    ),
                    _ => println!("{:.2}\t{:.2}%\t{}", item.score * 100., r.softmax * 100., item.path),
                }
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
