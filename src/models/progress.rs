//! 进度通道消息
//!
//! 通道推送 `{ type, data }`；`connected` 类型的消息本身就是负载。
//! `*_update` 为进度，`error_occurred` 为服务端错误，其余类型忽略。

use serde::Serialize;
use serde_json::Value;

/// 进度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    InProgress,
    Completed,
    Error,
}

/// 客户端看到的进度 `(index, total, status, error)`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub index: u64,
    /// 服务端报告之前未知
    pub total: Option<u64>,
    pub status: ProgressStatus,
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// `index >= total` 且 total 已知
    pub fn reached_total(&self) -> bool {
        matches!(self.total, Some(total) if total > 0 && self.index >= total)
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.total {
            Some(total) => write!(f, "{}/{}", self.index, total),
            None => write!(f, "{}/?", self.index),
        }
    }
}

/// 携带进度的负载
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressPayload {
    pub index: Option<u64>,
    pub total: Option<u64>,
    pub status: Option<String>,
}

impl ProgressPayload {
    pub fn from_value(value: &Value) -> Self {
        Self {
            index: value.get("index").and_then(as_count),
            total: value.get("total").and_then(as_count),
            status: value
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

/// 归一化后的通道消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMessage {
    /// `connected` 或 `*_update`
    Progress { kind: String, payload: ProgressPayload },
    /// `error_occurred`
    ErrorOccurred { message: String },
    /// 不认识的类型
    Ignored { kind: String },
}

impl ProgressMessage {
    /// 解析一条原始消息；非 JSON 或缺少 `type` 时返回 `None`
    pub fn parse(raw: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(raw).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?.to_string();

        if kind == "connected" {
            return Some(ProgressMessage::Progress {
                payload: ProgressPayload::from_value(value),
                kind,
            });
        }

        let data = value.get("data").unwrap_or(&Value::Null);

        if kind.ends_with("_update") {
            return Some(ProgressMessage::Progress {
                payload: ProgressPayload::from_value(data),
                kind,
            });
        }

        if kind == "error_occurred" {
            let message = data
                .get("message")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("服务端处理失败")
                .to_string();
            return Some(ProgressMessage::ErrorOccurred { message });
        }

        Some(ProgressMessage::Ignored { kind })
    }

    /// 初始一次性查询的结果按 `connected` 处理
    pub fn initial(payload: ProgressPayload) -> Self {
        ProgressMessage::Progress {
            kind: "connected".to_string(),
            payload,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ProgressMessage::Ignored { .. })
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
