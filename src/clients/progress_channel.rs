//! 进度推送通道
//!
//! 传输层只负责把原始消息文本交给上层，消息解释和计时都在 workflow 层完成。

use crate::clients::sse::SseDecoder;
use crate::config::Config;
use crate::error::StreamError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{header, Client};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// 原始消息流；流结束或返回错误都表示传输断开
pub type MessageStream = BoxStream<'static, Result<String, StreamError>>;

/// 首次连接时附带的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstOpen {
    pub exam_name: String,
    /// 答案卷数量
    pub total: u64,
}

/// 打开通道的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub exam_code: String,
    pub first_open: Option<FirstOpen>,
}

impl ChannelRequest {
    /// 重新连接或从路由恢复时使用
    pub fn reopen(exam_code: impl Into<String>) -> Self {
        Self {
            exam_code: exam_code.into(),
            first_open: None,
        }
    }

    pub fn first(exam_code: impl Into<String>, exam_name: impl Into<String>, total: u64) -> Self {
        Self {
            exam_code: exam_code.into(),
            first_open: Some(FirstOpen {
                exam_name: exam_name.into(),
                total,
            }),
        }
    }
}

/// 进度推送的传输层
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    async fn open(&self, request: &ChannelRequest) -> Result<MessageStream, StreamError>;
}

/// 基于 SSE 的传输层（`GET /storage/sse/connect`）
#[derive(Clone)]
pub struct SseTransport {
    client: Client,
    base_url: String,
}

impl SseTransport {
    /// 长连接不能设置整体超时，只限制建立连接的时间
    pub fn new(config: &Config) -> Result<Self, StreamError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StreamError::ConnectFailed {
                exam_code: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.stream_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// 拼接连接地址
    pub fn connect_url(&self, request: &ChannelRequest) -> Result<Url, StreamError> {
        let mut url = Url::parse(&format!("{}/storage/sse/connect", self.base_url)).map_err(
            |e| StreamError::ConnectFailed {
                exam_code: request.exam_code.clone(),
                reason: e.to_string(),
            },
        )?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("examCode", &request.exam_code);
            if let Some(first) = &request.first_open {
                query.append_pair("examName", &first.exam_name);
                query.append_pair("total", &first.total.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ProgressTransport for SseTransport {
    async fn open(&self, request: &ChannelRequest) -> Result<MessageStream, StreamError> {
        let url = self.connect_url(request)?;
        let exam_code = request.exam_code.clone();
        debug!("连接进度通道: {}", url);

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| StreamError::ConnectFailed {
                exam_code: exam_code.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StreamError::ConnectFailed {
                exam_code,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response.bytes_stream().boxed();
        let state = (bytes, SseDecoder::new(), VecDeque::new(), exam_code);
        let messages = stream::unfold(
            state,
            |(mut bytes, mut decoder, mut pending, exam_code)| async move {
                loop {
                    if let Some(data) = pending.pop_front() {
                        return Some((Ok(data), (bytes, decoder, pending, exam_code)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                        Some(Err(e)) => {
                            let err = StreamError::Disconnected {
                                exam_code: exam_code.clone(),
                                reason: e.to_string(),
                            };
                            return Some((Err(err), (bytes, decoder, pending, exam_code)));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(messages.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> SseTransport {
        let config = Config {
            stream_base_url: "http://localhost:8080/api/".to_string(),
            ..Config::default()
        };
        SseTransport::new(&config).unwrap()
    }

    #[test]
    fn first_open_carries_name_and_total() {
        let url = transport()
            .connect_url(&ChannelRequest::first("AB12", "중간 고사", 40))
            .unwrap();
        assert_eq!(url.path(), "/api/storage/sse/connect");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("examCode".to_string(), "AB12".to_string()),
                ("examName".to_string(), "중간 고사".to_string()),
                ("total".to_string(), "40".to_string()),
            ]
        );
    }

    #[test]
    fn reopen_only_sends_exam_code() {
        let url = transport()
            .connect_url(&ChannelRequest::reopen("AB12"))
            .unwrap();
        assert_eq!(url.query(), Some("examCode=AB12"));
    }
}
