//! 内存后端
//!
//! 与 HTTP 实现行为一致的内存版本，供离线演练和测试使用。

use crate::clients::exam_client::ExamApi;
use crate::clients::progress_channel::{ChannelRequest, MessageStream, ProgressTransport};
use crate::error::{ApiError, StreamError};
use crate::models::exam::{
    BatchPresignRequest, BatchPresignResponse, CreateExamRequest, CreatedExam, ExamHistoryItem,
    PresignedUrl, QuestionFeedback, StudentIdFeedback, UnknownQuestion,
};
use crate::models::progress::ProgressPayload;
use crate::models::question::Question;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

#[derive(Default)]
struct BackendState {
    exams: Vec<ExamHistoryItem>,
    next_id: u64,
    questions: HashMap<String, Vec<Question>>,
    attendance: HashSet<String>,
    uploaded_sheets: Vec<String>,
    active_processes: HashSet<String>,
    progress: HashMap<String, ProgressPayload>,
    unknown_images: HashMap<String, Vec<String>>,
    unknown_questions: HashMap<String, Vec<UnknownQuestion>>,
    student_feedback: Vec<StudentIdFeedback>,
    question_feedback: Vec<QuestionFeedback>,
    calls: Vec<String>,
    failures: HashMap<String, u16>,
    withheld_upload_urls: HashSet<usize>,
}

/// 内存版考试后端
#[derive(Clone, Default)]
pub struct InMemoryExamApi {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryExamApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置历史考试
    pub fn with_exams(exams: Vec<ExamHistoryItem>) -> Self {
        let api = Self::new();
        {
            let mut state = api.lock();
            for exam in &exams {
                if let Some(code) = &exam.code {
                    state.active_processes.insert(code.clone());
                }
            }
            state.next_id = exams.len() as u64;
            state.exams = exams;
        }
        api
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 让某个操作返回指定状态码，直到 `clear_failure`
    pub fn fail_with(&self, operation: &str, status: u16) {
        self.lock().failures.insert(operation.to_string(), status);
    }

    pub fn clear_failure(&self, operation: &str) {
        self.lock().failures.remove(operation);
    }

    pub fn set_progress(&self, exam_code: &str, payload: ProgressPayload) {
        self.lock().progress.insert(exam_code.to_string(), payload);
    }

    pub fn set_unknown_images(&self, exam_code: &str, urls: Vec<String>) {
        self.lock()
            .unknown_images
            .insert(exam_code.to_string(), urls);
    }

    pub fn set_unknown_questions(&self, exam_code: &str, questions: Vec<UnknownQuestion>) {
        self.lock()
            .unknown_questions
            .insert(exam_code.to_string(), questions);
    }

    /// 预签名响应中不返回该序号的上传地址
    pub fn withhold_upload_url(&self, index: usize) {
        self.lock().withheld_upload_urls.insert(index);
    }

    /// 按顺序记录的调用，形如 `create_exam` / `delete_exam:AB12`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn exams(&self) -> Vec<ExamHistoryItem> {
        self.lock().exams.clone()
    }

    pub fn saved_questions(&self, exam_id: &str) -> Option<Vec<Question>> {
        self.lock().questions.get(exam_id).cloned()
    }

    pub fn uploaded_sheets(&self) -> Vec<String> {
        self.lock().uploaded_sheets.clone()
    }

    pub fn has_attendance(&self, exam_code: &str) -> bool {
        self.lock().attendance.contains(exam_code)
    }

    pub fn has_active_process(&self, exam_code: &str) -> bool {
        self.lock().active_processes.contains(exam_code)
    }

    pub fn student_feedback(&self) -> Vec<StudentIdFeedback> {
        self.lock().student_feedback.clone()
    }

    pub fn question_feedback(&self) -> Vec<QuestionFeedback> {
        self.lock().question_feedback.clone()
    }

    /// 记录调用并检查预设的失败
    fn enter(&self, operation: &str, target: Option<&str>) -> Result<MutexGuard<'_, BackendState>, ApiError> {
        let mut state = self.lock();
        let call = match target {
            Some(t) => format!("{}:{}", operation, t),
            None => operation.to_string(),
        };
        state.calls.push(call);
        if let Some(status) = state.failures.get(operation).copied() {
            return Err(ApiError::BadStatus {
                endpoint: operation.to_string(),
                status,
                body: None,
            });
        }
        Ok(state)
    }
}

fn not_found(operation: &str) -> ApiError {
    ApiError::BadStatus {
        endpoint: operation.to_string(),
        status: 404,
        body: None,
    }
}

#[async_trait]
impl ExamApi for InMemoryExamApi {
    async fn create_exam(&self, request: &CreateExamRequest) -> Result<CreatedExam, ApiError> {
        let mut state = self.enter("create_exam", None)?;
        state.next_id += 1;
        let exam_id = state.next_id.to_string();
        let exam_code = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        state.exams.push(ExamHistoryItem {
            exam_id: exam_id.clone(),
            exam_name: request.exam_name.clone(),
            exam_date: request.exam_date.clone(),
            code: Some(exam_code.clone()),
        });
        state.active_processes.insert(exam_code.clone());
        Ok(CreatedExam {
            exam_id,
            exam_code,
            exam_name: request.exam_name.clone(),
            exam_date: request.exam_date.clone(),
        })
    }

    async fn upload_attendance(&self, exam: &CreatedExam, _file: &Path) -> Result<(), ApiError> {
        let mut state = self.enter("upload_attendance", Some(&exam.exam_code))?;
        state.attendance.insert(exam.exam_code.clone());
        Ok(())
    }

    async fn save_questions(&self, exam_id: &str, questions: &[Question]) -> Result<(), ApiError> {
        let mut state = self.enter("save_questions", Some(exam_id))?;
        state
            .questions
            .insert(exam_id.to_string(), questions.to_vec());
        Ok(())
    }

    async fn presign_answer_sheets(
        &self,
        request: &BatchPresignRequest,
    ) -> Result<BatchPresignResponse, ApiError> {
        let state = self.enter("presign_answer_sheets", Some(&request.exam_code))?;
        let urls = request
            .images
            .iter()
            .filter(|image| !state.withheld_upload_urls.contains(&image.index))
            .map(|image| PresignedUrl {
                index: image.index,
                filename: image.filename.clone(),
                url: format!(
                    "memory://{}/original/{}",
                    request.exam_code, image.filename
                ),
            })
            .collect();
        Ok(BatchPresignResponse {
            exam_code: request.exam_code.clone(),
            urls,
        })
    }

    async fn upload_answer_sheet(
        &self,
        url: &str,
        _file: &Path,
        _content_type: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.enter("upload_answer_sheet", None)?;
        state.uploaded_sheets.push(url.to_string());
        Ok(())
    }

    async fn list_exams(&self) -> Result<Vec<ExamHistoryItem>, ApiError> {
        let state = self.enter("list_exams", None)?;
        Ok(state.exams.clone())
    }

    async fn get_exam_by_code(&self, exam_code: &str) -> Result<ExamHistoryItem, ApiError> {
        let state = self.enter("get_exam", Some(exam_code))?;
        state
            .exams
            .iter()
            .find(|e| e.code.as_deref() == Some(exam_code))
            .cloned()
            .ok_or_else(|| not_found("get_exam"))
    }

    async fn delete_exam_by_code(&self, exam_code: &str) -> Result<(), ApiError> {
        let mut state = self.enter("delete_exam", Some(exam_code))?;
        let before = state.exams.len();
        state.exams.retain(|e| e.code.as_deref() != Some(exam_code));
        if state.exams.len() == before {
            return Err(not_found("delete_exam"));
        }
        Ok(())
    }

    async fn get_progress(&self, exam_code: &str) -> Result<Option<ProgressPayload>, ApiError> {
        let state = self.enter("get_progress", Some(exam_code))?;
        Ok(state.progress.get(exam_code).cloned())
    }

    async fn stop_active_process(&self, exam_code: &str) -> Result<(), ApiError> {
        let mut state = self.enter("stop_process", Some(exam_code))?;
        if state.active_processes.remove(exam_code) {
            Ok(())
        } else {
            Err(not_found("stop_process"))
        }
    }

    async fn unknown_images(&self, exam_code: &str) -> Result<Vec<String>, ApiError> {
        let state = self.enter("unknown_images", Some(exam_code))?;
        Ok(state
            .unknown_images
            .get(exam_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn unknown_questions(&self, exam_code: &str) -> Result<Vec<UnknownQuestion>, ApiError> {
        let state = self.enter("unknown_questions", Some(exam_code))?;
        Ok(state
            .unknown_questions
            .get(exam_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_student_id_feedback(
        &self,
        feedback: &StudentIdFeedback,
    ) -> Result<(), ApiError> {
        let mut state = self.enter("student_id_feedback", Some(&feedback.exam_code))?;
        state.student_feedback.push(feedback.clone());
        Ok(())
    }

    async fn submit_question_feedback(&self, feedback: &QuestionFeedback) -> Result<(), ApiError> {
        let mut state = self.enter("question_feedback", Some(&feedback.exam_code))?;
        state.question_feedback.push(feedback.clone());
        Ok(())
    }
}

type Frame = Result<String, StreamError>;

#[derive(Default)]
struct TransportState {
    opens: Vec<ChannelRequest>,
    live: Option<UnboundedSender<Frame>>,
    queued: Vec<Frame>,
    failing_opens: usize,
}

/// 手动推送消息的传输层
///
/// 没有活动连接时推送的消息会排队，下次连接时一并送出。
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 推送一条原始消息
    pub fn send(&self, raw: impl Into<String>) {
        self.push(Ok(raw.into()));
    }

    pub fn send_event(&self, event: serde_json::Value) {
        self.send(event.to_string());
    }

    fn push(&self, frame: Frame) {
        let mut state = self.lock();
        let frame = match &state.live {
            Some(sender) => match sender.unbounded_send(frame) {
                Ok(()) => return,
                Err(e) => e.into_inner(),
            },
            None => frame,
        };
        state.live = None;
        state.queued.push(frame);
    }

    /// 断开当前连接
    pub fn drop_connection(&self) {
        self.lock().live = None;
    }

    /// 接下来 `count` 次连接失败
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().failing_opens = count;
    }

    pub fn opens(&self) -> Vec<ChannelRequest> {
        self.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens.len()
    }

    /// 已经被消费方丢弃的连接数
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressTransport for ScriptedTransport {
    async fn open(&self, request: &ChannelRequest) -> Result<MessageStream, StreamError> {
        let mut state = self.lock();
        state.opens.push(request.clone());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(StreamError::ConnectFailed {
                exam_code: request.exam_code.clone(),
                reason: "scripted failure".to_string(),
            });
        }

        let (sender, receiver) = unbounded();
        for frame in state.queued.drain(..) {
            let _ = sender.unbounded_send(frame);
        }
        state.live = Some(sender);

        Ok(TrackedStream {
            inner: receiver,
            closed: Arc::clone(&self.closed),
        }
        .boxed())
    }
}

struct TrackedStream {
    inner: UnboundedReceiver<Frame>,
    closed: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_messages_are_delivered_on_open() {
        let transport = ScriptedTransport::new();
        transport.send("first");
        let mut stream = transport
            .open(&ChannelRequest::reopen("AB12"))
            .await
            .unwrap();
        transport.send("second");
        assert_eq!(stream.next().await.unwrap().unwrap(), "first");
        assert_eq!(stream.next().await.unwrap().unwrap(), "second");

        transport.drop_connection();
        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(transport.closed_count(), 1);
    }

    #[tokio::test]
    async fn stop_process_reports_gone_the_second_time() {
        let api = InMemoryExamApi::new();
        let exam = api
            .create_exam(&CreateExamRequest {
                exam_name: "중간".into(),
                exam_date: "2025-09-01".into(),
            })
            .await
            .unwrap();
        assert!(api.stop_active_process(&exam.exam_code).await.is_ok());
        let err = api.stop_active_process(&exam.exam_code).await.unwrap_err();
        assert!(err.is_gone());
    }
}
