//! 考试后端 REST 客户端
//!
//! 所有接口都经过 `ExamApi` 抽象，编排层和测试只依赖这个 trait。

use crate::config::Config;
use crate::error::ApiError;
use crate::models::exam::{
    BatchPresignRequest, BatchPresignResponse, CreateExamRequest, CreatedExam, ExamHistoryItem,
    QuestionFeedback, SaveQuestionsRequest, StudentIdFeedback, UnknownQuestion,
};
use crate::models::progress::ProgressPayload;
use crate::models::question::Question;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{header, multipart, Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 考试后端接口
#[async_trait]
pub trait ExamApi: Send + Sync {
    /// `POST /exams`
    async fn create_exam(&self, request: &CreateExamRequest) -> Result<CreatedExam, ApiError>;

    /// 上传出勤表（multipart）
    async fn upload_attendance(&self, exam: &CreatedExam, file: &Path) -> Result<(), ApiError>;

    /// `POST /questions`
    async fn save_questions(&self, exam_id: &str, questions: &[Question]) -> Result<(), ApiError>;

    /// `POST /storage/presigned-urls/batch`
    async fn presign_answer_sheets(
        &self,
        request: &BatchPresignRequest,
    ) -> Result<BatchPresignResponse, ApiError>;

    /// 按预签名地址 PUT 上传一张答案卷
    async fn upload_answer_sheet(
        &self,
        url: &str,
        file: &Path,
        content_type: &str,
    ) -> Result<(), ApiError>;

    /// `GET /exams`
    async fn list_exams(&self) -> Result<Vec<ExamHistoryItem>, ApiError>;

    /// `GET /exams/code/{code}`
    async fn get_exam_by_code(&self, exam_code: &str) -> Result<ExamHistoryItem, ApiError>;

    /// `DELETE /exams/code/{code}`
    async fn delete_exam_by_code(&self, exam_code: &str) -> Result<(), ApiError>;

    /// `GET /storage/progress/{code}`；没有会话时返回 `None`
    async fn get_progress(&self, exam_code: &str) -> Result<Option<ProgressPayload>, ApiError>;

    /// `DELETE /storage/active-processes/{code}`
    async fn stop_active_process(&self, exam_code: &str) -> Result<(), ApiError>;

    /// `GET /reports/unknown-images/{code}`
    async fn unknown_images(&self, exam_code: &str) -> Result<Vec<String>, ApiError>;

    /// `GET /reports/unknown-questions/{code}`
    async fn unknown_questions(&self, exam_code: &str) -> Result<Vec<UnknownQuestion>, ApiError>;

    /// `POST /feedback`
    async fn submit_student_id_feedback(&self, feedback: &StudentIdFeedback)
        -> Result<(), ApiError>;

    /// `POST /question-feedback`
    async fn submit_question_feedback(&self, feedback: &QuestionFeedback) -> Result<(), ApiError>;
}

/// 基于 reqwest 的后端客户端
#[derive(Clone)]
pub struct HttpExamClient {
    client: Client,
    base_url: String,
}

impl HttpExamClient {
    /// 创建新的后端客户端
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::RequestFailed {
                endpoint: config.api_base_url.clone(),
                source: Box::new(e),
            })?;
        Ok(Self::with_client(client, &config.api_base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        debug!("GET {}", path);
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| request_failed(path, e))?;
        decode_json(path, ensure_success(path, response).await?).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed(path, e))?;
        ensure_success(path, response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        debug!("DELETE {}", path);
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| request_failed(path, e))?;
        ensure_success(path, response).await?;
        Ok(())
    }
}

#[async_trait]
impl ExamApi for HttpExamClient {
    async fn create_exam(&self, request: &CreateExamRequest) -> Result<CreatedExam, ApiError> {
        let path = "/exams";
        decode_json(path, self.post_json(path, request).await?).await
    }

    async fn upload_attendance(&self, exam: &CreatedExam, file: &Path) -> Result<(), ApiError> {
        let path = "/forward";
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| request_failed(path, e))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attendance".to_string());

        let form = multipart::Form::new()
            .text("examId", exam.exam_id.clone())
            .text("examCode", exam.exam_code.clone())
            .text("type", "attendance")
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        debug!("POST {} (multipart)", path);
        let response = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_failed(path, e))?;
        ensure_success(path, response).await?;
        Ok(())
    }

    async fn save_questions(&self, exam_id: &str, questions: &[Question]) -> Result<(), ApiError> {
        let request = SaveQuestionsRequest { exam_id, questions };
        self.post_json("/questions", &request).await?;
        Ok(())
    }

    async fn presign_answer_sheets(
        &self,
        request: &BatchPresignRequest,
    ) -> Result<BatchPresignResponse, ApiError> {
        let path = "/storage/presigned-urls/batch";
        decode_json(path, self.post_json(path, request).await?).await
    }

    async fn upload_answer_sheet(
        &self,
        url: &str,
        file: &Path,
        content_type: &str,
    ) -> Result<(), ApiError> {
        let endpoint = "presigned upload";
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| request_failed(endpoint, e))?;
        let response = self
            .client
            .put(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_failed(endpoint, e))?;
        ensure_success(endpoint, response).await?;
        Ok(())
    }

    async fn list_exams(&self) -> Result<Vec<ExamHistoryItem>, ApiError> {
        self.get_json("/exams").await
    }

    async fn get_exam_by_code(&self, exam_code: &str) -> Result<ExamHistoryItem, ApiError> {
        self.get_json(&format!("/exams/code/{}", encode_segment(exam_code)))
            .await
    }

    async fn delete_exam_by_code(&self, exam_code: &str) -> Result<(), ApiError> {
        self.delete(&format!("/exams/code/{}", encode_segment(exam_code)))
            .await
    }

    async fn get_progress(&self, exam_code: &str) -> Result<Option<ProgressPayload>, ApiError> {
        let path = format!("/storage/progress/{}", encode_segment(exam_code));
        match self.get_json::<serde_json::Value>(&path).await {
            Ok(value) => Ok(Some(ProgressPayload::from_value(&value))),
            Err(e) if e.is_gone() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn stop_active_process(&self, exam_code: &str) -> Result<(), ApiError> {
        self.delete(&format!(
            "/storage/active-processes/{}",
            encode_segment(exam_code)
        ))
        .await
    }

    async fn unknown_images(&self, exam_code: &str) -> Result<Vec<String>, ApiError> {
        self.get_json(&format!(
            "/reports/unknown-images/{}",
            encode_segment(exam_code)
        ))
        .await
    }

    async fn unknown_questions(&self, exam_code: &str) -> Result<Vec<UnknownQuestion>, ApiError> {
        self.get_json(&format!(
            "/reports/unknown-questions/{}",
            encode_segment(exam_code)
        ))
        .await
    }

    async fn submit_student_id_feedback(
        &self,
        feedback: &StudentIdFeedback,
    ) -> Result<(), ApiError> {
        self.post_json("/feedback", feedback).await?;
        Ok(())
    }

    async fn submit_question_feedback(&self, feedback: &QuestionFeedback) -> Result<(), ApiError> {
        self.post_json("/question-feedback", feedback).await?;
        Ok(())
    }
}

/// 根据扩展名推断图片类型
pub fn content_type_for(file: &Path) -> &'static str {
    match file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}

fn request_failed(
    endpoint: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ApiError {
    ApiError::RequestFailed {
        endpoint: endpoint.to_string(),
        source: Box::new(source),
    }
}

async fn ensure_success(endpoint: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.ok().filter(|b| !b.is_empty());
    Err(ApiError::BadStatus {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn decode_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, ApiError> {
    response.json::<T>().await.map_err(|e| ApiError::DecodeFailed {
        endpoint: endpoint.to_string(),
        source: Box::new(e),
    })
}
