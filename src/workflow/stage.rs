//! 阶段状态机
//!
//! `Input → StudentIdRecognizing → StudentIdFeedback → QuestionRecognizing
//!  → QuestionFeedback → Grading → Done`
//!
//! 终止状态：`Done`、`Cancelled`、`TimedOut`、`Error`。
//! `Error` 可以重试或取消，`TimedOut` 只能重新进入（重新加载）或取消。

use crate::error::TransitionError;
use std::fmt;

/// 需要等待服务端处理的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    StudentId,
    Question,
    Grading,
}

impl Phase {
    /// 对应的识别/评分阶段
    pub fn recognizing_stage(self) -> Stage {
        match self {
            Phase::StudentId => Stage::StudentIdRecognizing,
            Phase::Question => Stage::QuestionRecognizing,
            Phase::Grading => Stage::Grading,
        }
    }

    /// 路由中的名称
    pub fn route_segment(self) -> &'static str {
        match self {
            Phase::StudentId => "student-id",
            Phase::Question => "question",
            Phase::Grading => "grading",
        }
    }
}

/// 阶段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Input,
    StudentIdRecognizing,
    StudentIdFeedback,
    QuestionRecognizing,
    QuestionFeedback,
    Grading,
    Done,
    Cancelled,
    TimedOut { phase: Phase },
    Error { phase: Phase, message: String },
}

/// 驱动阶段变化的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// 考试创建、上传完成，通道已建立
    Submitted,
    /// 当前识别/评分阶段完成
    Completed,
    /// 用户提交了反馈
    FeedbackSubmitted,
    /// 通道超时
    StreamTimedOut,
    /// 服务端报告错误
    ServerError(String),
    /// 重新进入失败的阶段
    Retry,
    /// 用户确认取消且回滚成功
    Cancelled,
}

impl fmt::Display for StageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageEvent::Submitted => write!(f, "Submitted"),
            StageEvent::Completed => write!(f, "Completed"),
            StageEvent::FeedbackSubmitted => write!(f, "FeedbackSubmitted"),
            StageEvent::StreamTimedOut => write!(f, "StreamTimedOut"),
            StageEvent::ServerError(_) => write!(f, "ServerError"),
            StageEvent::Retry => write!(f, "Retry"),
            StageEvent::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Input => write!(f, "Input"),
            Stage::StudentIdRecognizing => write!(f, "StudentIdRecognizing"),
            Stage::StudentIdFeedback => write!(f, "StudentIdFeedback"),
            Stage::QuestionRecognizing => write!(f, "QuestionRecognizing"),
            Stage::QuestionFeedback => write!(f, "QuestionFeedback"),
            Stage::Grading => write!(f, "Grading"),
            Stage::Done => write!(f, "Done"),
            Stage::Cancelled => write!(f, "Cancelled"),
            Stage::TimedOut { phase } => write!(f, "TimedOut({:?})", phase),
            Stage::Error { phase, .. } => write!(f, "Error({:?})", phase),
        }
    }
}

impl Stage {
    /// 计算下一个阶段，不接受的事件返回错误
    pub fn apply(&self, event: &StageEvent) -> Result<Stage, TransitionError> {
        use StageEvent as E;

        let next = match (self, event) {
            (Stage::Input, E::Submitted) => Stage::StudentIdRecognizing,

            (Stage::StudentIdRecognizing, E::Completed) => Stage::StudentIdFeedback,
            (Stage::QuestionRecognizing, E::Completed) => Stage::QuestionFeedback,
            (Stage::Grading, E::Completed) => Stage::Done,

            (Stage::StudentIdFeedback, E::FeedbackSubmitted) => Stage::QuestionRecognizing,
            (Stage::QuestionFeedback, E::FeedbackSubmitted) => Stage::Grading,

            (s, E::StreamTimedOut) if s.is_recognizing() => Stage::TimedOut {
                phase: s.phase().unwrap_or(Phase::StudentId),
            },
            (s, E::ServerError(message)) if s.is_recognizing() => Stage::Error {
                phase: s.phase().unwrap_or(Phase::StudentId),
                message: message.clone(),
            },

            (Stage::Error { phase, .. }, E::Retry) | (Stage::TimedOut { phase }, E::Retry) => {
                phase.recognizing_stage()
            }

            (s, E::Cancelled) if !matches!(s, Stage::Done | Stage::Cancelled) => Stage::Cancelled,

            _ => {
                return Err(TransitionError {
                    stage: self.to_string(),
                    event: event.to_string(),
                })
            }
        };
        Ok(next)
    }

    /// 正在等待服务端推送进度
    pub fn is_recognizing(&self) -> bool {
        matches!(
            self,
            Stage::StudentIdRecognizing | Stage::QuestionRecognizing | Stage::Grading
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Done | Stage::Cancelled | Stage::TimedOut { .. } | Stage::Error { .. }
        )
    }

    /// 所属的处理阶段
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Stage::StudentIdRecognizing | Stage::StudentIdFeedback => Some(Phase::StudentId),
            Stage::QuestionRecognizing | Stage::QuestionFeedback => Some(Phase::Question),
            Stage::Grading => Some(Phase::Grading),
            Stage::TimedOut { phase } | Stage::Error { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// 是否拦截后退
    pub fn guards_back_navigation(&self) -> bool {
        !matches!(self, Stage::Input) && !self.is_terminal()
    }

    /// 阶段对应的路由
    pub fn route(&self, exam_code: &str) -> String {
        match self {
            Stage::Input | Stage::Cancelled => "/".to_string(),
            Stage::StudentIdFeedback => format!("/exam/{}/feedback/student-id", exam_code),
            Stage::QuestionFeedback => format!("/exam/{}/feedback/question", exam_code),
            Stage::Done => format!("/exam/{}/done", exam_code),
            Stage::StudentIdRecognizing
            | Stage::QuestionRecognizing
            | Stage::Grading
            | Stage::TimedOut { .. }
            | Stage::Error { .. } => {
                let phase = self.phase().unwrap_or(Phase::StudentId);
                format!("/exam/{}/loading/{}", exam_code, phase.route_segment())
            }
        }
    }

    /// 从路由恢复阶段，返回 `(阶段, 考试代码)`
    pub fn from_route(route: &str) -> Option<(Stage, String)> {
        let segments: Vec<&str> = route
            .split('?')
            .next()
            .unwrap_or_default()
            .trim_matches('/')
            .split('/')
            .collect();

        let (code, rest) = match segments.as_slice() {
            ["exam", code, rest @ ..] if !code.is_empty() => (code.to_string(), rest),
            _ => return None,
        };

        let stage = match rest {
            ["loading", "student-id"] => Stage::StudentIdRecognizing,
            ["feedback", "student-id"] => Stage::StudentIdFeedback,
            ["loading", "question"] => Stage::QuestionRecognizing,
            ["feedback", "question"] => Stage::QuestionFeedback,
            ["loading", "grading"] => Stage::Grading,
            ["done"] | ["loading", "grading", "done"] => Stage::Done,
            _ => return None,
        };
        Some((stage, code))
    }
}
