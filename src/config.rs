use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::matcher::Thresholds;

#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 素材目录，可以指定多次
    #[arg(short, long = "assets", value_name = "DIR")]
    pub assets: Vec<PathBuf>,
    /// 跳过以此开头的路径，可以指定多次
    #[arg(long, value_name = "PREFIX")]
    pub skip: Vec<String>,
    /// 图片后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png,gif,heic,webp,bmp")]
    pub image_ext: String,
    /// 视频后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "mp4,flv,mov,mkv,webm,avi")]
    pub video_ext: String,
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedderOptions {
    /// 特征提取服务地址
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8001")]
    pub embedder_url: String,
    /// 特征提取请求超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 120)]
    pub embedder_timeout: u64,
    /// 视频抽帧间隔，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 2.)]
    pub frame_interval: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 正向提示词的相似度阈值，单位为百分比
    #[arg(long, value_name = "PERCENT", default_value_t = 10.)]
    pub positive_threshold: f32,
    /// 反向提示词的相似度阈值，单位为百分比
    #[arg(long, value_name = "PERCENT", default_value_t = 10.)]
    pub negative_threshold: f32,
    /// 以图搜索的相似度阈值，单位为百分比
    #[arg(long, value_name = "PERCENT", default_value_t = 85.)]
    pub image_threshold: f32,
    /// 写入缓存前保留的最大结果数量
    #[arg(long, value_name = "N", default_value_t = 150)]
    pub max_results: usize,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 6)]
    pub count: usize,
    /// 不使用搜索结果缓存
    #[arg(long)]
    pub no_cache: bool,
}

impl SearchOptions {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds::from_percent(
            self.positive_threshold,
            self.negative_threshold,
            self.image_threshold,
        )
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mmsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// mmsearch 配置文件目录
    #[arg(short, long, default_value_t)]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描素材目录，为新增或修改的素材计算特征
    Scan(ScanCommand),
    /// 搜索图片或视频
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 清空搜索结果缓存
    Clean(CleanCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("mmsearch.db")
    }

    /// 返回扫描断点文件的路径
    pub fn checkpoint(&self) -> PathBuf {
        self.path.join("scan.checkpoint")
    }

    /// 返回上传图片的临时目录
    pub fn upload_dir(&self) -> PathBuf {
        self.path.join("upload")
    }
}

impl Default for ConfDir {
    fn default() -> Self {
        let path = ProjectDirs::from("", "", "mmsearch")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".mmsearch"));
        Self { path }
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl fmt::Display for ConfDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_default_thresholds() {
        let opts = Opts::parse_from(["mmsearch", "-c", "/tmp/mm", "clean"]);
        assert_eq!(opts.conf_dir.database(), PathBuf::from("/tmp/mm/mmsearch.db"));

        let opts = Opts::parse_from(["mmsearch", "search", "--positive-threshold", "36", "cat"]);
        let SubCommand::Search(search) = opts.subcmd else {
            panic!("expected search command");
        };
        let thresholds = search.search.thresholds();
        assert!((thresholds.positive - 0.36).abs() < 1e-6);
        assert!((thresholds.image - 0.85).abs() < 1e-6);
    }
}
