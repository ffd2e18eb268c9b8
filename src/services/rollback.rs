//! 中断处理 - 业务能力层
//!
//! 两步拆除：停止服务端进程、删除考试记录。两步都会执行，
//! 只有删除考试失败才算整体失败。

use crate::clients::ExamApi;
use crate::error::RollbackError;
use std::sync::Arc;
use tracing::{info, warn};

/// 停止服务端进程的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStop {
    Stopped,
    /// 服务端已经没有这个进程
    AlreadyGone,
    /// 停止失败，但不影响整体结果
    Failed(String),
}

/// 中断处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub exam_code: String,
    pub process: ProcessStop,
    /// 考试记录在请求前已被删除
    pub exam_already_gone: bool,
}

/// 中断处理
#[derive(Clone)]
pub struct RollbackController {
    api: Arc<dyn ExamApi>,
}

impl RollbackController {
    pub fn new(api: Arc<dyn ExamApi>) -> Self {
        Self { api }
    }

    /// 中断正在进行的评分
    ///
    /// # 参数
    /// - `exam_code`: 考试代码
    ///
    /// # 返回
    /// 删除考试记录失败时返回 `RollbackError::DeleteFailed`
    pub async fn cancel(&self, exam_code: &str) -> Result<RollbackReport, RollbackError> {
        info!("🛑 中断考试 {}", exam_code);

        let (stop, delete) = tokio::join!(
            self.api.stop_active_process(exam_code),
            self.api.delete_exam_by_code(exam_code)
        );

        let process = match stop {
            Ok(()) => ProcessStop::Stopped,
            Err(e) if e.is_gone() => ProcessStop::AlreadyGone,
            Err(e) => {
                warn!("⚠️  停止服务端进程失败 ({}): {}", exam_code, e);
                ProcessStop::Failed(e.to_string())
            }
        };

        let exam_already_gone = match delete {
            Ok(()) => false,
            Err(e) if e.is_gone() => true,
            Err(e) => {
                warn!("❌ 删除考试失败 ({}): {}", exam_code, e);
                return Err(RollbackError::DeleteFailed {
                    exam_code: exam_code.to_string(),
                    source: e,
                });
            }
        };

        info!("✓ 考试 {} 已中断 (进程: {:?})", exam_code, process);
        Ok(RollbackReport {
            exam_code: exam_code.to_string(),
            process,
            exam_already_gone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::InMemoryExamApi;
    use crate::models::exam::CreateExamRequest;

    async fn created(api: &InMemoryExamApi) -> String {
        api.create_exam(&CreateExamRequest {
            exam_name: "중간고사".into(),
            exam_date: "2025-09-01".into(),
        })
        .await
        .unwrap()
        .exam_code
    }

    #[tokio::test]
    async fn stops_process_and_deletes_exam() {
        let api = InMemoryExamApi::new();
        let code = created(&api).await;
        let controller = RollbackController::new(Arc::new(api.clone()));

        let report = controller.cancel(&code).await.unwrap();
        assert_eq!(report.process, ProcessStop::Stopped);
        assert!(!api.has_active_process(&code));
        assert!(api.exams().is_empty());
    }

    #[tokio::test]
    async fn failed_stop_still_deletes_exam() {
        let api = InMemoryExamApi::new();
        let code = created(&api).await;
        api.fail_with("stop_process", 500);
        let controller = RollbackController::new(Arc::new(api.clone()));

        let report = controller.cancel(&code).await.unwrap();
        assert!(matches!(report.process, ProcessStop::Failed(_)));
        assert!(api.calls().contains(&format!("delete_exam:{}", code)));
        assert!(api.exams().is_empty());
    }

    #[tokio::test]
    async fn gone_process_counts_as_success() {
        let api = InMemoryExamApi::new();
        let code = created(&api).await;
        api.stop_active_process(&code).await.unwrap();
        let controller = RollbackController::new(Arc::new(api.clone()));

        let report = controller.cancel(&code).await.unwrap();
        assert_eq!(report.process, ProcessStop::AlreadyGone);
    }

    #[tokio::test]
    async fn failed_delete_is_reported() {
        let api = InMemoryExamApi::new();
        let code = created(&api).await;
        api.fail_with("delete_exam", 500);
        let controller = RollbackController::new(Arc::new(api.clone()));

        let err = controller.cancel(&code).await.unwrap_err();
        assert!(matches!(err, RollbackError::DeleteFailed { .. }));
        assert_eq!(api.exams().len(), 1);
    }
}
