//! 进度归并
//!
//! 不含任何 IO 和计时器，只根据消息更新进度并告诉调用方该做什么。

use crate::models::progress::{ProgressMessage, ProgressSnapshot, ProgressStatus};
use std::time::Duration;
use tokio::time::Instant;

/// 自动完成计时器的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoComplete {
    /// 保持原样
    Keep,
    /// 重新开始计时
    Arm,
    /// 取消计时
    Disarm,
}

/// 应用一条消息的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// 快照是否变化
    pub changed: bool,
    /// 本次应该触发完成（只会出现一次）
    pub completed: bool,
    pub auto_complete: AutoComplete,
    /// 服务端报告的错误
    pub failure: Option<String>,
}

impl Applied {
    fn nothing() -> Self {
        Self {
            changed: false,
            completed: false,
            auto_complete: AutoComplete::Keep,
            failure: None,
        }
    }
}

/// 单个会话的进度状态
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
    last_message_at: Instant,
    completed: bool,
}

impl ProgressTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            snapshot: ProgressSnapshot::default(),
            last_message_at: now,
            completed: false,
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// 应用一条消息
    ///
    /// index 直接替换（服务端为准，不做最大值限制）；total 只在为正数时替换。
    pub fn apply(&mut self, message: &ProgressMessage, now: Instant) -> Applied {
        match message {
            ProgressMessage::Ignored { .. } => Applied::nothing(),
            ProgressMessage::ErrorOccurred { message } => {
                self.last_message_at = now;
                self.snapshot.status = ProgressStatus::Error;
                self.snapshot.error = Some(message.clone());
                Applied {
                    changed: true,
                    completed: false,
                    auto_complete: AutoComplete::Disarm,
                    failure: Some(message.clone()),
                }
            }
            ProgressMessage::Progress { payload, .. } => {
                self.last_message_at = now;
                let before = (self.snapshot.index, self.snapshot.total);

                if let Some(index) = payload.index {
                    self.snapshot.index = index;
                }
                if let Some(total) = payload.total.filter(|t| *t > 0) {
                    self.snapshot.total = Some(total);
                }

                let moved = (self.snapshot.index, self.snapshot.total) != before;
                let auto_complete = if !moved {
                    AutoComplete::Keep
                } else if self.snapshot.reached_total() {
                    AutoComplete::Arm
                } else {
                    AutoComplete::Disarm
                };

                let completed = payload.is_completed() && self.mark_complete();

                Applied {
                    changed: moved || completed,
                    completed,
                    auto_complete,
                    failure: None,
                }
            }
        }
    }

    /// 标记完成，只有第一次返回 true
    pub fn mark_complete(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.snapshot.status = ProgressStatus::Completed;
        true
    }

    /// 超时后进入错误状态
    pub fn mark_timed_out(&mut self, reason: String) {
        self.snapshot.status = ProgressStatus::Error;
        self.snapshot.error = Some(reason);
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_message_at)
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }
}
