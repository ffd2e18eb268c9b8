//! 阶段编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **提交**：创建考试、上传出勤表和答案表、上传答案卷、建立学号识别通道
//! 2. **推进**：根据进度会话的结果和用户的反馈切换阶段
//! 3. **中断**：经 RollbackController 回滚，失败时保持原阶段
//! 4. **会话管理**：任意时刻最多一个活动会话，新阶段开启前关闭旧会话
//!
//! 阶段变化全部经过 `Stage::apply`，先检查事件是否合法，再执行网络操作，
//! 最后提交新阶段。

use crate::clients::{content_type_for, ChannelRequest, ExamApi, ProgressTransport};
use crate::config::StreamSettings;
use crate::error::{ApiError, AppError, AppResult, StreamError, ValidationError};
use crate::models::exam::{BatchPresignRequest, CreateExamRequest, CreatedExam, ExamDraft, PresignImage};
use crate::models::progress::ProgressSnapshot;
use crate::services::feedback::{question_payload, student_id_payload};
use crate::services::{
    DraftStore, FeedbackService, QuestionItem, RollbackController, RollbackReport, StudentIdItem,
};
use crate::workflow::back_guard::{self, BackDecision, RouteHistory};
use crate::workflow::{
    ElapsedTicker, ProgressSession, ProgressStreamClient, Stage, StageEvent, StreamOutcome,
};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 当前处理中的考试
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamRef {
    pub exam_id: String,
    pub exam_code: String,
    pub exam_name: String,
}

impl From<&CreatedExam> for ExamRef {
    fn from(exam: &CreatedExam) -> Self {
        Self {
            exam_id: exam.exam_id.clone(),
            exam_code: exam.exam_code.clone(),
            exam_name: exam.exam_name.clone(),
        }
    }
}

/// 阶段编排器
pub struct StageOrchestrator {
    api: Arc<dyn ExamApi>,
    streams: ProgressStreamClient,
    rollback: RollbackController,
    feedback: FeedbackService,
    stage: Stage,
    exam: Option<ExamRef>,
    session: Option<ProgressSession>,
    ticker: Option<ElapsedTicker>,
    history: RouteHistory,
}

impl StageOrchestrator {
    pub fn new(
        api: Arc<dyn ExamApi>,
        transport: Arc<dyn ProgressTransport>,
        store: Arc<dyn DraftStore>,
        settings: StreamSettings,
    ) -> Self {
        let mut history = RouteHistory::new();
        history.push("/");
        Self {
            streams: ProgressStreamClient::new(Arc::clone(&api), transport, settings),
            rollback: RollbackController::new(Arc::clone(&api)),
            feedback: FeedbackService::new(Arc::clone(&api), store),
            api,
            stage: Stage::Input,
            exam: None,
            session: None,
            ticker: None,
            history,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn exam(&self) -> Option<&ExamRef> {
        self.exam.as_ref()
    }

    pub fn exam_code(&self) -> Option<&str> {
        self.exam.as_ref().map(|e| e.exam_code.as_str())
    }

    /// 当前阶段的路由
    pub fn route(&self) -> String {
        self.stage.route(self.exam_code().unwrap_or_default())
    }

    pub fn history(&self) -> &RouteHistory {
        &self.history
    }

    pub fn has_active_session(&self) -> bool {
        self.session.as_ref().map(|s| !s.is_closed()).unwrap_or(false)
    }

    /// 当前会话的进度
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.session.as_ref().map(ProgressSession::snapshot)
    }

    pub fn subscribe_progress(&self) -> Option<watch::Receiver<ProgressSnapshot>> {
        self.session.as_ref().map(ProgressSession::subscribe)
    }

    /// 当前阶段已经过的秒数（仅用于显示）
    pub fn elapsed_secs(&self) -> u64 {
        self.ticker.as_ref().map(ElapsedTicker::seconds).unwrap_or(0)
    }

    // ========== 提交 ==========

    /// 提交考试草稿
    ///
    /// # 流程
    /// 1. 本地校验（失败时不发出任何请求）
    /// 2. 创建考试 → 上传出勤表 → 保存答案表 → 上传答案卷
    /// 3. 建立学号识别通道（附带考试名称和答案卷数量）
    ///
    /// 任何一步失败都停留在 Input。
    pub async fn submit(&mut self, draft: &ExamDraft) -> AppResult<CreatedExam> {
        let next = self.stage.apply(&StageEvent::Submitted)?;
        draft.validate()?;
        let attendance = draft
            .attendance_file
            .as_ref()
            .ok_or(ValidationError::MissingAttendance)?;

        let exam = self
            .api
            .create_exam(&CreateExamRequest {
                exam_name: draft.exam_name.trim().to_string(),
                exam_date: draft.exam_date.trim().to_string(),
            })
            .await?;
        info!("📝 考试已创建: {} ({})", exam.exam_name, exam.exam_code);

        let session = match self.upload_and_connect(&exam, attendance, draft).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    "⚠️  考试 {} 已创建但提交未完成: {}",
                    exam.exam_code, e
                );
                return Err(e);
            }
        };

        self.exam = Some(ExamRef::from(&exam));
        self.install_session(session);
        self.commit(next);
        Ok(exam)
    }

    async fn upload_and_connect(
        &self,
        exam: &CreatedExam,
        attendance: &Path,
        draft: &ExamDraft,
    ) -> AppResult<ProgressSession> {
        self.api.upload_attendance(exam, attendance).await?;
        debug!("出勤表已上传: {}", attendance.display());

        self.api
            .save_questions(&exam.exam_id, draft.answer_key.questions())
            .await?;
        info!(
            "✓ 答案表已保存: {} 题, 总分 {}",
            draft.answer_key.len(),
            draft.answer_key.total_score()
        );

        self.upload_answer_sheets(&exam.exam_code, &draft.answer_sheet_files)
            .await?;

        let request = ChannelRequest::first(
            &exam.exam_code,
            &exam.exam_name,
            draft.answer_sheet_files.len() as u64,
        );
        Ok(self.streams.open(request).await?)
    }

    async fn upload_answer_sheets(&self, exam_code: &str, files: &[PathBuf]) -> AppResult<()> {
        if files.is_empty() {
            warn!("⚠️  没有答案卷需要上传");
            return Ok(());
        }

        let images = files
            .iter()
            .enumerate()
            .map(|(index, path)| PresignImage {
                index,
                content_type: content_type_for(path).to_string(),
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("sheet_{}", index)),
            })
            .collect();
        let presigned = self
            .api
            .presign_answer_sheets(&BatchPresignRequest {
                exam_code: exam_code.to_string(),
                images,
            })
            .await?;

        // 每张答案卷都必须有上传地址，否则进度永远到不了 total
        let mut targets: Vec<Option<&str>> = vec![None; files.len()];
        for target in &presigned.urls {
            if let Some(slot) = targets.get_mut(target.index) {
                *slot = Some(target.url.as_str());
            }
        }
        let missing: Vec<usize> = targets
            .iter()
            .enumerate()
            .filter(|(_, url)| url.is_none())
            .map(|(index, _)| index)
            .collect();
        if !missing.is_empty() {
            return Err(ApiError::MissingUploadUrls {
                exam_code: exam_code.to_string(),
                missing,
            }
            .into());
        }

        let uploads = files
            .iter()
            .zip(targets.into_iter().flatten())
            .map(|(path, url)| {
                self.api
                    .upload_answer_sheet(url, path, content_type_for(path))
            });
        try_join_all(uploads).await?;

        info!("✓ 答案卷已上传: {} 张", files.len());
        Ok(())
    }

    // ========== 从路由恢复 ==========

    /// 页面重新加载后从路由恢复
    ///
    /// 识别/评分阶段会重新建立通道（不带首次连接参数），由初始查询同步进度。
    pub async fn resume_from_route(&mut self, route: &str) -> AppResult<Stage> {
        if self.stage != Stage::Input || self.exam.is_some() {
            return Err(AppError::transition(&self.stage, "Resume"));
        }
        let (stage, exam_code) = Stage::from_route(route)
            .ok_or_else(|| AppError::Other(format!("无法识别的路由: {}", route)))?;

        let exam = self.api.get_exam_by_code(&exam_code).await?;
        let exam = ExamRef {
            exam_id: exam.exam_id,
            exam_code: exam_code.clone(),
            exam_name: exam.exam_name,
        };

        if stage.is_recognizing() {
            let session = self.streams.open(ChannelRequest::reopen(&exam_code)).await?;
            self.install_session(session);
        }

        info!("↩️  从路由恢复: {} ({})", route, stage);
        self.exam = Some(exam);
        self.commit(stage.clone());
        Ok(stage)
    }

    // ========== 等待进度 ==========

    /// 等待当前识别/评分阶段结束并切换阶段
    ///
    /// 可以被取消（例如中断时），会话保持不变。
    pub async fn wait_for_stage(&mut self) -> AppResult<Stage> {
        if !self.stage.is_recognizing() {
            return Err(AppError::transition(&self.stage, "WaitForProgress"));
        }
        let exam_code = self.exam_code().unwrap_or_default().to_string();
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Closed { exam_code })?;

        let outcome = session.outcome().await?;
        let event = match outcome {
            StreamOutcome::Completed => StageEvent::Completed,
            StreamOutcome::TimedOut { .. } => StageEvent::StreamTimedOut,
            StreamOutcome::Failed { message } => StageEvent::ServerError(message),
        };

        let next = self.stage.apply(&event)?;
        self.close_session();
        Ok(self.commit(next))
    }

    // ========== 反馈 ==========

    pub async fn student_id_items(&self) -> AppResult<Vec<StudentIdItem>> {
        self.feedback
            .load_student_id_items(self.require_exam_code()?)
            .await
    }

    pub fn save_student_id_draft(&self, items: &[StudentIdItem]) -> AppResult<()> {
        Ok(self
            .feedback
            .save_student_id_draft(self.require_exam_code()?, items)?)
    }

    /// 提交学号反馈
    ///
    /// 反馈在后台发送，不等待结果；随后进入题目识别阶段。
    pub async fn submit_student_id_feedback(&mut self, items: &[StudentIdItem]) -> AppResult<Stage> {
        let next = self.stage.apply(&StageEvent::FeedbackSubmitted)?;
        let exam_code = self.require_exam_code()?.to_string();
        let payload = if items.is_empty() {
            None
        } else {
            Some(student_id_payload(&exam_code, items)?)
        };

        let session = self
            .streams
            .open(ChannelRequest::reopen(&exam_code))
            .await?;

        if let Some(payload) = payload {
            let api = Arc::clone(&self.api);
            tokio::spawn(async move {
                match api.submit_student_id_feedback(&payload).await {
                    Ok(()) => info!("✓ 学号反馈已发送: {} 张", payload.images.len()),
                    Err(e) => warn!("⚠️  学号反馈发送失败: {}", e),
                }
            });
        }
        if let Err(e) = self.feedback.clear_student_id_draft(&exam_code) {
            warn!("⚠️  清除学号草稿失败: {}", e);
        }

        self.install_session(session);
        Ok(self.commit(next))
    }

    pub async fn question_items(&self) -> AppResult<Vec<QuestionItem>> {
        self.feedback
            .load_question_items(self.require_exam_code()?)
            .await
    }

    pub fn save_question_draft(&self, items: &[QuestionItem]) -> AppResult<()> {
        Ok(self
            .feedback
            .save_question_draft(self.require_exam_code()?, items)?)
    }

    /// 提交题目反馈
    ///
    /// 反馈结果影响评分，必须等待成功后才进入评分阶段；没有待确认题目时直接进入。
    pub async fn submit_question_feedback(&mut self, items: &[QuestionItem]) -> AppResult<Stage> {
        let next = self.stage.apply(&StageEvent::FeedbackSubmitted)?;
        let exam_code = self.require_exam_code()?.to_string();

        if !items.is_empty() {
            let payload = question_payload(&exam_code, items)?;
            self.api.submit_question_feedback(&payload).await?;
            info!("✓ 题目反馈已提交: {} 道", payload.questions.len());
            if let Err(e) = self.feedback.clear_question_draft(&exam_code) {
                warn!("⚠️  清除题目草稿失败: {}", e);
            }
        }

        let session = self
            .streams
            .open(ChannelRequest::reopen(&exam_code))
            .await?;
        self.install_session(session);
        Ok(self.commit(next))
    }

    // ========== 重试 / 中断 / 后退 ==========

    /// 服务端错误或超时后重新进入同一阶段
    pub async fn retry(&mut self) -> AppResult<Stage> {
        let next = self.stage.apply(&StageEvent::Retry)?;
        let exam_code = self.require_exam_code()?.to_string();
        let session = self
            .streams
            .open(ChannelRequest::reopen(&exam_code))
            .await?;
        self.install_session(session);
        Ok(self.commit(next))
    }

    /// 用户确认后中断
    ///
    /// 回滚失败时返回错误，阶段和会话保持不变。
    pub async fn cancel(&mut self) -> AppResult<Option<RollbackReport>> {
        let next = self.stage.apply(&StageEvent::Cancelled)?;

        let report = match (&self.stage, self.exam.as_ref()) {
            (Stage::Input, _) | (_, None) => None,
            (_, Some(exam)) => Some(self.rollback.cancel(&exam.exam_code).await?),
        };

        if let Some(code) = self.exam_code().map(str::to_string) {
            for result in [
                self.feedback.clear_student_id_draft(&code),
                self.feedback.clear_question_draft(&code),
            ] {
                if let Err(e) = result {
                    warn!("⚠️  清除草稿失败: {}", e);
                }
            }
        }

        self.close_session();
        self.commit(next);
        Ok(report)
    }

    /// 处理一次后退
    ///
    /// 用户确认离开时只停止监听，不回滚服务端任务。
    pub fn on_back_attempt(&mut self, confirm: impl FnOnce() -> bool) -> BackDecision {
        let route = self.route();
        let decision = back_guard::on_back_attempt(&self.stage, &route, confirm, &mut self.history);
        if decision == BackDecision::Leave {
            info!("⬅️  离开 {}，停止监听进度", route);
            self.close_session();
        }
        decision
    }

    // ========== 内部 ==========

    fn require_exam_code(&self) -> AppResult<&str> {
        self.exam_code()
            .ok_or_else(|| AppError::transition(&self.stage, "NoExam"))
    }

    /// 关闭旧会话后安装新会话
    fn install_session(&mut self, session: ProgressSession) {
        self.close_session();
        self.session = Some(session);
        self.ticker = Some(ElapsedTicker::start());
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    fn commit(&mut self, next: Stage) -> Stage {
        let code = self.exam_code().unwrap_or("-").to_string();
        info!("🔀 阶段切换 [{}]: {} → {}", code, self.stage, next);
        self.stage = next;
        let route = self.route();
        self.history.push(route);
        self.stage.clone()
    }
}

impl Drop for StageOrchestrator {
    fn drop(&mut self) {
        self.close_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryExamApi, ScriptedTransport};
    use crate::models::answer_key::{AnswerKey, QuestionPatch};
    use crate::services::MemoryDraftStore;
    use serde_json::json;

    struct Fixture {
        api: InMemoryExamApi,
        transport: ScriptedTransport,
        orchestrator: StageOrchestrator,
    }

    fn fixture() -> Fixture {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();
        let orchestrator = StageOrchestrator::new(
            Arc::new(api.clone()),
            Arc::new(transport.clone()),
            Arc::new(MemoryDraftStore::new()),
            StreamSettings::default(),
        );
        Fixture {
            api,
            transport,
            orchestrator,
        }
    }

    fn draft() -> ExamDraft {
        let key = AnswerKey::new();
        let id = key.questions()[0].id.clone();
        let key = key.update_question(&id, &QuestionPatch::text("3"));
        ExamDraft {
            exam_name: "중간고사".into(),
            exam_date: "2025-09-01".into(),
            attendance_file: Some(PathBuf::from("attendance.xlsx")),
            answer_sheet_files: vec![PathBuf::from("001.jpg"), PathBuf::from("002.png")],
            answer_key: key,
        }
    }

    fn completed() -> serde_json::Value {
        json!({ "type": "recognition_update", "data": { "index": 2, "total": 2, "status": "completed" } })
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_draft_sends_nothing() {
        let mut f = fixture();
        let mut bad = draft();
        bad.attendance_file = None;
        let err = f.orchestrator.submit(&bad).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::MissingAttendance)));
        assert!(f.api.calls().is_empty());
        assert_eq!(f.orchestrator.stage(), &Stage::Input);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_runs_pipeline_and_opens_first_channel() {
        let mut f = fixture();
        let exam = f.orchestrator.submit(&draft()).await.unwrap();

        assert_eq!(f.orchestrator.stage(), &Stage::StudentIdRecognizing);
        assert!(f.api.has_attendance(&exam.exam_code));
        assert_eq!(f.api.saved_questions(&exam.exam_id).unwrap().len(), 1);
        assert_eq!(f.api.uploaded_sheets().len(), 2);
        assert_eq!(
            f.transport.opens(),
            vec![ChannelRequest::first(&exam.exam_code, "중간고사", 2)]
        );
        assert_eq!(
            f.orchestrator.route(),
            format!("/exam/{}/loading/student-id", exam.exam_code)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_upload_stays_at_input() {
        let mut f = fixture();
        f.api.fail_with("presign_answer_sheets", 500);
        assert!(f.orchestrator.submit(&draft()).await.is_err());
        assert_eq!(f.orchestrator.stage(), &Stage::Input);
        assert_eq!(f.transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_upload_url_aborts_submission() {
        let mut f = fixture();
        f.api.withhold_upload_url(1);

        let err = f.orchestrator.submit(&draft()).await.unwrap_err();
        match err {
            AppError::Api(ApiError::MissingUploadUrls { missing, .. }) => {
                assert_eq!(missing, vec![1]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.orchestrator.stage(), &Stage::Input);
        assert_eq!(f.transport.open_count(), 0);
        assert!(f.api.uploaded_sheets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_session_is_active_across_stages() {
        let mut f = fixture();
        f.orchestrator.submit(&draft()).await.unwrap();
        f.transport.send_event(completed());
        assert_eq!(
            f.orchestrator.wait_for_stage().await.unwrap(),
            Stage::StudentIdFeedback
        );
        assert!(!f.orchestrator.has_active_session());

        f.orchestrator.submit_student_id_feedback(&[]).await.unwrap();
        assert_eq!(f.orchestrator.stage(), &Stage::QuestionRecognizing);
        assert!(f.orchestrator.has_active_session());
        assert_eq!(f.transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_question_feedback_keeps_stage() {
        let mut f = fixture();
        f.orchestrator.submit(&draft()).await.unwrap();
        f.transport.send_event(completed());
        f.orchestrator.wait_for_stage().await.unwrap();
        f.orchestrator.submit_student_id_feedback(&[]).await.unwrap();
        f.transport.send_event(completed());
        f.orchestrator.wait_for_stage().await.unwrap();
        assert_eq!(f.orchestrator.stage(), &Stage::QuestionFeedback);

        f.api.fail_with("question_feedback", 503);
        let items = vec![QuestionItem {
            question_number: "3".into(),
            recognized_answer: "B".into(),
            image_url: None,
            correct_answer: "C".into(),
        }];
        assert!(f.orchestrator.submit_question_feedback(&items).await.is_err());
        assert_eq!(f.orchestrator.stage(), &Stage::QuestionFeedback);

        f.api.clear_failure("question_feedback");
        assert_eq!(
            f.orchestrator.submit_question_feedback(&items).await.unwrap(),
            Stage::Grading
        );
        assert_eq!(f.api.question_feedback().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_from_input_makes_no_calls() {
        let mut f = fixture();
        assert_eq!(f.orchestrator.cancel().await.unwrap(), None);
        assert_eq!(f.orchestrator.stage(), &Stage::Cancelled);
        assert!(f.api.calls().is_empty());
        assert!(f.orchestrator.cancel().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rollback_keeps_stage_and_session() {
        let mut f = fixture();
        f.orchestrator.submit(&draft()).await.unwrap();
        f.api.fail_with("delete_exam", 500);

        let err = f.orchestrator.cancel().await.unwrap_err();
        assert!(matches!(err, AppError::Rollback(_)));
        assert_eq!(f.orchestrator.stage(), &Stage::StudentIdRecognizing);
        assert!(f.orchestrator.has_active_session());
    }

    #[tokio::test(start_paused = true)]
    async fn declined_back_navigation_keeps_session() {
        let mut f = fixture();
        f.orchestrator.submit(&draft()).await.unwrap();
        let before = f.orchestrator.history().len();

        assert_eq!(f.orchestrator.on_back_attempt(|| false), BackDecision::Stay);
        assert_eq!(f.orchestrator.history().len(), before + 1);
        assert!(f.orchestrator.has_active_session());

        assert_eq!(f.orchestrator.on_back_attempt(|| true), BackDecision::Leave);
        assert!(!f.orchestrator.has_active_session());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_reopens_channel_without_first_open_params() {
        let mut f = fixture();
        let exam = f
            .api
            .create_exam(&CreateExamRequest {
                exam_name: "기말".into(),
                exam_date: "2025-12-01".into(),
            })
            .await
            .unwrap();

        let route = format!("/exam/{}/loading/question", exam.exam_code);
        let stage = f.orchestrator.resume_from_route(&route).await.unwrap();
        assert_eq!(stage, Stage::QuestionRecognizing);
        assert_eq!(f.orchestrator.exam().unwrap().exam_name, "기말");
        assert_eq!(f.transport.opens(), vec![ChannelRequest::reopen(&exam.exam_code)]);
    }
}
