use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// 扫描进度与素材总数
#[derive(Debug, Clone, Default)]
pub struct ScanProgress {
    pub is_scanning: bool,
    /// 本次扫描需要处理的文件数
    pub total_files: usize,
    /// 已处理的文件数
    pub scanned_count: usize,
    pub start_time: Option<Instant>,
    /// 数据库中的图片数量
    pub total_image_count: u64,
    /// 数据库中的视频帧数量
    pub total_frame_count: u64,
}

impl ScanProgress {
    pub fn remain_files(&self) -> usize {
        self.total_files.saturating_sub(self.scanned_count)
    }

    /// 扫描进度，范围 0 ~ 1，未在扫描时为 0
    pub fn progress(&self) -> f64 {
        if !self.is_scanning || self.total_files == 0 {
            return 0.;
        }
        self.scanned_count as f64 / self.total_files as f64
    }

    /// 按已处理文件的平均耗时估算剩余时间
    pub fn remain_time(&self) -> Duration {
        match self.start_time {
            Some(start) if self.scanned_count > 0 => {
                start.elapsed().div_f64(self.scanned_count as f64) * self.remain_files() as u32
            }
            _ => Duration::ZERO,
        }
    }
}

/// 进程内共享的扫描状态
///
/// 只有持有 [`ScanGuard`] 的扫描任务可以修改进度，其余地方只能读取快照。
#[derive(Debug, Default)]
pub struct ScanState {
    inner: RwLock<ScanProgress>,
}

impl ScanState {
    pub fn new(total_image_count: u64, total_frame_count: u64) -> Self {
        Self {
            inner: RwLock::new(ScanProgress {
                total_image_count,
                total_frame_count,
                ..Default::default()
            }),
        }
    }

    /// 当前进度的快照
    pub fn snapshot(&self) -> ScanProgress {
        self.read().clone()
    }

    /// 开始扫描，已有扫描在进行时返回 None
    pub fn try_begin(self: &Arc<Self>) -> Option<ScanGuard> {
        let mut progress = self.write();
        if progress.is_scanning {
            return None;
        }
        progress.is_scanning = true;
        progress.total_files = 0;
        progress.scanned_count = 0;
        progress.start_time = Some(Instant::now());
        Some(ScanGuard { state: self.clone() })
    }

    // 扫描线程 panic 时锁会中毒，但进度数据本身仍然可用
    fn read(&self) -> RwLockReadGuard<'_, ScanProgress> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScanProgress> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 正在进行的扫描，释放时清空进度，保留素材总数
#[derive(Debug)]
pub struct ScanGuard {
    state: Arc<ScanState>,
}

impl ScanGuard {
    pub fn set_total_files(&self, total: usize) {
        self.state.write().total_files = total;
    }

    pub fn inc_scanned(&self) {
        self.state.write().scanned_count += 1;
    }

    pub fn set_totals(&self, total_image_count: u64, total_frame_count: u64) {
        let mut progress = self.state.write();
        progress.total_image_count = total_image_count;
        progress.total_frame_count = total_frame_count;
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let mut progress = self.state.write();
        progress.is_scanning = false;
        progress.total_files = 0;
        progress.scanned_count = 0;
        progress.start_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_scan_at_a_time() {
        let state = Arc::new(ScanState::new(3, 10));
        let guard = state.try_begin().unwrap();
        assert!(state.try_begin().is_none());
        assert!(state.snapshot().is_scanning);

        drop(guard);
        assert!(!state.snapshot().is_scanning);
        assert!(state.try_begin().is_some());
    }

    #[test]
    fn test_guard_drop_keeps_totals() {
        let state = Arc::new(ScanState::new(0, 0));
        {
            let guard = state.try_begin().unwrap();
            guard.set_total_files(4);
            guard.inc_scanned();
            guard.set_totals(7, 42);

            let progress = state.snapshot();
            assert_eq!(progress.remain_files(), 3);
            assert_eq!(progress.progress(), 0.25);
        }
        let progress = state.snapshot();
        assert_eq!(progress.total_files, 0);
        assert_eq!(progress.scanned_count, 0);
        assert!(progress.start_time.is_none());
        assert_eq!((progress.total_image_count, progress.total_frame_count), (7, 42));
    }

    #[test]
    fn test_remain_time_uses_remaining_files() {
        let progress = ScanProgress {
            is_scanning: true,
            total_files: 10,
            scanned_count: 5,
            start_time: Instant::now().checked_sub(Duration::from_secs(10)),
            ..Default::default()
        };
        let remain = progress.remain_time().as_secs_f64();
        // 每个文件约 2 秒，剩余 5 个
        assert!((9.9..11.).contains(&remain), "{}", remain);
    }

    #[test]
    fn test_idle_progress() {
        let progress = ScanProgress::default();
        assert_eq!(progress.progress(), 0.);
        assert_eq!(progress.remain_time(), Duration::ZERO);
    }
}
