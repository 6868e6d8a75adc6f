use sqlx::{Executor, Result, Sqlite};

use super::{FrameRecord, ImageRecord, PathRecord};

/// 根据路径查找图片
pub async fn find_image_by_path<'c, E>(executor: E, path: &str) -> Result<Option<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image WHERE path = ?")
        .bind(path)
        .fetch_optional(executor)
        .await
}

/// 根据 ID 查找图片
pub async fn find_image_by_id<'c, E>(executor: E, id: i64) -> Result<Option<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 获取所有图片记录
pub async fn find_all_images<'c, E>(executor: E) -> Result<Vec<ImageRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image ORDER BY id ASC")
        .fetch_all(executor)
        .await
}

/// 获取所有图片的 ID 和路径，不读取特征
pub async fn find_image_paths<'c, E>(executor: E) -> Result<Vec<PathRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, PathRecord>("SELECT id, path FROM image").fetch_all(executor).await
}

/// 插入或更新图片记录
pub async fn upsert_image<'c, E>(
    executor: E,
    path: &str,
    modify_time: i64,
    embedding: &[u8],
) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO image (path, modify_time, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT (path) DO UPDATE SET
            modify_time = excluded.modify_time,
            embedding = excluded.embedding
        "#,
    )
    .bind(path)
    .bind(modify_time)
    .bind(embedding)
    .execute(executor)
    .await?;
    Ok(())
}

/// 删除图片记录
pub async fn delete_image<'c, E>(executor: E, id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("DELETE FROM image WHERE id = ?").bind(id).execute(executor).await?;
    Ok(())
}

/// 统计图片数量
pub async fn count_images<'c, E>(executor: E) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM image").fetch_one(executor).await?;
    Ok(count as u64)
}

/// 获取视频入库时的修改时间，视频不存在时返回 None
pub async fn find_video_modify_time<'c, E>(executor: E, path: &str) -> Result<Option<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT modify_time FROM video_frame WHERE path = ? LIMIT 1")
            .bind(path)
            .fetch_optional(executor)
            .await?;
    Ok(row.map(|(t,)| t))
}

/// 获取一个视频的所有帧，按帧时间升序
pub async fn find_frames_by_path<'c, E>(executor: E, path: &str) -> Result<Vec<FrameRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, FrameRecord>(
        "SELECT * FROM video_frame WHERE path = ? ORDER BY frame_time ASC, id ASC",
    )
    .bind(path)
    .fetch_all(executor)
    .await
}

/// 根据 ID 查找视频帧
pub async fn find_frame_by_id<'c, E>(executor: E, id: i64) -> Result<Option<FrameRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, FrameRecord>("SELECT * FROM video_frame WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// 获取所有视频路径
pub async fn find_video_paths<'c, E>(executor: E) -> Result<Vec<String>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT path FROM video_frame ORDER BY path ASC")
            .fetch_all(executor)
            .await?;
    Ok(rows.into_iter().map(|(path,)| path).collect())
}

/// 添加一个视频帧
pub async fn insert_frame<'c, E>(
    executor: E,
    path: &str,
    frame_time: f64,
    modify_time: i64,
    embedding: &[u8],
) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO video_frame (path, frame_time, modify_time, embedding)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(path)
    .bind(frame_time)
    .bind(modify_time)
    .bind(embedding)
    .execute(executor)
    .await?;
    Ok(())
}

/// 删除一个视频的所有帧，返回删除的帧数
pub async fn delete_frames_by_path<'c, E>(executor: E, path: &str) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result =
        sqlx::query("DELETE FROM video_frame WHERE path = ?").bind(path).execute(executor).await?;
    Ok(result.rows_affected())
}

/// 删除单个视频帧
pub async fn delete_frame<'c, E>(executor: E, id: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("DELETE FROM video_frame WHERE id = ?").bind(id).execute(executor).await?;
    Ok(())
}

/// 统计视频帧数量
pub async fn count_frames<'c, E>(executor: E) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM video_frame").fetch_one(executor).await?;
    Ok(count as u64)
}

/// 读取缓存
pub async fn get_cache<'c, E>(executor: E, key: &str) -> Result<Option<Vec<u8>>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT result FROM search_cache WHERE key = ?")
        .bind(key)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(|(result,)| result))
}

/// 写入缓存，已存在时覆盖
pub async fn put_cache<'c, E>(executor: E, key: &str, result: &[u8]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("INSERT OR REPLACE INTO search_cache (key, result) VALUES (?, ?)")
        .bind(key)
        .bind(result)
        .execute(executor)
        .await?;
    Ok(())
}

/// 清空缓存，返回删除的条数
pub async fn clear_cache<'c, E>(executor: E) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM search_cache").execute(executor).await?;
    Ok(result.rows_affected())
}
