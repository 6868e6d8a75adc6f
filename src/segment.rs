//! 视频片段合并
//!
//! 逐帧匹配的结果是一串命中标记，这里把相邻的命中帧合并为片段，
//! 并根据帧时间计算片段的起止时间。

/// 同一片段内允许的最大帧序号间隔，即中间最多容忍 2 个未命中的帧
pub const MAX_FRAME_GAP: usize = 2;

/// 返回连续命中的帧序号区间（闭区间）
///
/// 例如第 2-5 帧、第 11-13 帧命中，则返回 `[(2, 5), (11, 13)]`。
/// 两个命中帧的序号差不超过 [`MAX_FRAME_GAP`] 时视为同一片段。
pub fn get_index_pairs(hits: &[bool]) -> Vec<(usize, usize)> {
    let mut pairs = vec![];
    let mut current: Option<(usize, usize)> = None;

    for index in hits.iter().enumerate().filter_map(|(i, &hit)| hit.then_some(i)) {
        current = match current {
            Some((start, end)) if index - end <= MAX_FRAME_GAP => Some((start, index)),
            Some(pair) => {
                pairs.push(pair);
                Some((index, index))
            }
            None => Some((index, index)),
        };
    }
    pairs.extend(current);

    pairs
}

/// 计算片段的起止时间
///
/// 起点取与前一帧时间的中点并向下取整，终点取与后一帧时间的中点并四舍五入（0.5 向上），
/// 位于序列首尾时直接使用该帧自身的时间。
pub fn segment_bounds(frame_times: &[f64], (first, last): (usize, usize)) -> (f64, f64) {
    let start = if first > 0 {
        ((frame_times[first] + frame_times[first - 1]) / 2.).floor()
    } else {
        frame_times[first]
    };
    let end = if last + 1 < frame_times.len() {
        ((frame_times[last] + frame_times[last + 1]) / 2. + 0.5).floor()
    } else {
        frame_times[last]
    };
    (start, end)
}
