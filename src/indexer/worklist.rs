use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// 每处理多少个文件保存一次断点
pub const CHECKPOINT_INTERVAL: usize = 100;

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    paths: BTreeSet<String>,
}

/// 待处理的文件列表，用于中断后继续扫描
#[derive(Debug)]
pub struct ScanWorklist {
    path: PathBuf,
    pending: BTreeSet<String>,
    /// 上次保存后完成的文件数
    unsaved: usize,
}

impl ScanWorklist {
    /// 由扫描到的文件创建新的列表
    pub fn new(path: impl Into<PathBuf>, files: impl IntoIterator<Item = String>) -> Self {
        Self { path: path.into(), pending: files.into_iter().collect(), unsaved: 0 }
    }

    /// 读取断点，不存在时返回 None
    ///
    /// 断点文件损坏时同样返回 None，此时会重新开始扫描。
    pub fn load(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match bincode::deserialize::<Checkpoint>(&data) {
            Ok(checkpoint) if checkpoint.version == CHECKPOINT_VERSION => {
                debug!("读取断点：剩余 {} 个文件", checkpoint.paths.len());
                Ok(Some(Self { path, pending: checkpoint.paths, unsaved: 0 }))
            }
            Ok(checkpoint) => {
                warn!("断点版本不匹配（{}），重新开始扫描", checkpoint.version);
                Ok(None)
            }
            Err(e) => {
                warn!("断点文件损坏，重新开始扫描：{}", e);
                Ok(None)
            }
        }
    }

    /// 保存断点，先写入临时文件再替换
    pub fn save(&mut self) -> Result<()> {
        let checkpoint = Checkpoint { version: CHECKPOINT_VERSION, paths: self.pending.clone() };
        let data = bincode::serialize(&checkpoint)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        self.unsaved = 0;
        Ok(())
    }

    /// 删除断点文件
    pub fn discard(self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// 只保留满足条件的文件
    pub fn retain(&mut self, f: impl FnMut(&String) -> bool) {
        self.pending.retain(f);
    }

    /// 当前列表的副本，遍历时可以修改原列表
    pub fn snapshot(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.pending.contains(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 标记一个文件已完成，每完成 [`CHECKPOINT_INTERVAL`] 个文件保存一次断点
    pub fn complete(&mut self, path: &str) -> Result<()> {
        if self.pending.remove(path) {
            self.unsaved += 1;
        }
        if self.unsaved >= CHECKPOINT_INTERVAL {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/assets/{:04}.jpg", i)).collect()
    }

    #[test]
    fn test_missing_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(ScanWorklist::load(dir.path().join("scan.checkpoint"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_corrupt_checkpoint_starts_fresh() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scan.checkpoint");
        fs::write(&path, b"\xff\xff\xff")?;
        assert!(ScanWorklist::load(&path)?.is_none());
        Ok(())
    }

    #[test]
    fn test_checkpoint_every_interval() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scan.checkpoint");
        let mut worklist = ScanWorklist::new(&path, files(250));
        worklist.save()?;

        for file in worklist.snapshot().iter().take(CHECKPOINT_INTERVAL - 1) {
            worklist.complete(file)?;
        }
        assert_eq!(ScanWorklist::load(&path)?.unwrap().len(), 250);

        let next = worklist.snapshot()[0].clone();
        worklist.complete(&next)?;
        let saved = ScanWorklist::load(&path)?.unwrap();
        assert_eq!(saved.len(), 150);
        assert!(!saved.contains(&next));
        assert!(saved.contains("/assets/0249.jpg"));
        Ok(())
    }

    #[test]
    fn test_complete_unknown_path_is_ignored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut worklist = ScanWorklist::new(dir.path().join("scan.checkpoint"), files(2));
        worklist.complete("/elsewhere.jpg")?;
        assert_eq!(worklist.len(), 2);
        assert_eq!(worklist.unsaved, 0);
        Ok(())
    }

    #[test]
    fn test_discard() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scan.checkpoint");
        let mut worklist = ScanWorklist::new(&path, files(3));
        worklist.save()?;
        assert!(path.exists());
        worklist.discard()?;
        assert!(!path.exists());
        Ok(())
    }
}
