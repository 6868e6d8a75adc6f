/// 图片记录
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImageRecord {
    /// 图片 ID
    pub id: i64,
    /// 图片路径，唯一
    pub path: String,
    /// 入库时文件的修改时间，单位为纳秒
    pub modify_time: i64,
    /// 序列化后的特征向量
    pub embedding: Vec<u8>,
}

/// 视频帧记录
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FrameRecord {
    /// 帧 ID
    pub id: i64,
    /// 视频路径，同一视频的所有帧相同
    pub path: String,
    /// 帧在视频中的时间，单位为秒
    pub frame_time: f64,
    /// 入库时文件的修改时间，单位为纳秒
    pub modify_time: i64,
    /// 序列化后的特征向量
    pub embedding: Vec<u8>,
}

/// 只包含 ID 和路径的记录，用于清理已删除的文件
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PathRecord {
    pub id: i64,
    pub path: String,
}
