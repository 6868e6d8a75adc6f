use std::path::Path;
use std::time::Duration;

use futures::future::{BoxFuture, ready};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{EmbedError, Embedder, Embedding, FrameStream};
use crate::config::EmbedderOptions;

/// 通过 HTTP 调用外部特征提取服务
///
/// 服务接口：
/// - `POST /embed/text`，JSON `{"text": ...}`
/// - `POST /embed/image`，请求体为图片原始数据
/// - `POST /embed/video`，JSON `{"path": ..., "interval": ...}`，按行返回 JSON（NDJSON）
///
/// 以上接口返回 422 表示素材无法处理。
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    frame_interval: f64,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct VideoRequest<'a> {
    path: &'a str,
    interval: f64,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct FrameResponse {
    frame_time: f64,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(opts: &EmbedderOptions) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(opts.embedder_timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: opts.embedder_url.trim_end_matches('/').to_string(),
            frame_interval: opts.frame_interval,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    async fn fetch_embedding(response: Response) -> Result<Embedding, EmbedError> {
        let data: EmbeddingResponse = check_status(response).await?.json().await?;
        to_embedding(data.embedding)
    }
}

impl Embedder for HttpEmbedder {
    fn embed_image<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<Embedding, EmbedError>> {
        async move {
            let data = tokio::fs::read(path).await?;
            debug!("请求图片特征: {}", path.display());
            let response = self.client.post(self.url("embed/image")).body(data).send().await?;
            Self::fetch_embedding(response).await
        }
        .boxed()
    }

    fn embed_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Embedding, EmbedError>> {
        async move {
            let response =
                self.client.post(self.url("embed/text")).json(&TextRequest { text }).send().await?;
            Self::fetch_embedding(response).await
        }
        .boxed()
    }

    fn embed_video_frames<'a>(&'a self, path: &'a Path) -> FrameStream<'a> {
        let request = async move {
            let path = path.to_string_lossy();
            debug!("请求视频帧特征: {}", path);
            let response = self
                .client
                .post(self.url("embed/video"))
                .json(&VideoRequest { path: &path, interval: self.frame_interval })
                .send()
                .await?;
            let response = check_status(response).await?;
            Ok::<_, EmbedError>(ndjson_frames(response.bytes_stream()))
        };
        request
            .map(|result| match result {
                Ok(frames) => frames,
                Err(e) => stream::once(ready(Err(e))).boxed(),
            })
            .flatten_stream()
            .boxed()
    }
}

async fn check_status(response: Response) -> Result<Response, EmbedError> {
    if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
        let message = response.text().await.unwrap_or_default();
        return Err(EmbedError::Unprocessable(message));
    }
    Ok(response.error_for_status()?)
}

fn to_embedding(values: Vec<f32>) -> Result<Embedding, EmbedError> {
    Embedding::new(values).ok_or_else(|| EmbedError::Protocol("特征向量为空或包含非法数值".into()))
}

fn parse_frame(line: &[u8]) -> Result<(f64, Embedding), EmbedError> {
    let frame: FrameResponse =
        serde_json::from_slice(line).map_err(|e| EmbedError::Protocol(e.to_string()))?;
    Ok((frame.frame_time, to_embedding(frame.embedding)?))
}

/// 将按行分隔的 JSON 字节流逐行解析为视频帧，不会一次性读取全部响应
fn ndjson_frames<S, B>(bytes: S) -> BoxStream<'static, Result<(f64, Embedding), EmbedError>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (bytes.boxed(), Vec::<u8>::new(), false);
    stream::unfold(state, |(mut bytes, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line = buf.drain(..=pos).collect::<Vec<_>>();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some((parse_frame(&line), (bytes, buf, done)));
            }
            if done {
                if buf.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                let line = std::mem::take(&mut buf);
                return Some((parse_frame(&line), (bytes, buf, done)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buf.clear();
                    return Some((Err(EmbedError::from(e)), (bytes, buf, true)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = reqwest::Result<&'static [u8]>> {
        stream::iter(parts.iter().map(|s| Ok(s.as_bytes())).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_ndjson_split_across_chunks() {
        let stream = ndjson_frames(chunks(&[
            "{\"frame_time\": 0, \"embed",
            "ding\": [1.0, 0.0]}\n{\"frame_time\": 2, \"embedding\": [0.0, 1.0]}\n",
            "\n{\"frame_time\": 4, \"embedding\": [0.5, 0.5]}",
        ]));
        let frames = stream.collect::<Vec<_>>().await;
        assert_eq!(frames.len(), 3);
        let times = frames.iter().map(|f| f.as_ref().unwrap().0).collect::<Vec<_>>();
        assert_eq!(times, vec![0., 2., 4.]);
        assert_eq!(frames[1].as_ref().unwrap().1.as_slice(), &[0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_ndjson_bad_line() {
        let stream = ndjson_frames(chunks(&["{\"frame_time\": 0, \"embedding\": []}\n"]));
        let frames = stream.collect::<Vec<_>>().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(EmbedError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_ndjson_empty() {
        let stream = ndjson_frames(chunks(&[]));
        assert!(stream.collect::<Vec<_>>().await.is_empty());
    }
}
