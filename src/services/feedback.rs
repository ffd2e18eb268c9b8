//! 反馈服务 - 业务能力层
//!
//! 负责加载识别不确定的学号/题目、合并本地草稿、组装提交数据。
//! 提交时机由编排层决定。

use crate::clients::ExamApi;
use crate::error::{ApiError, AppResult, StoreError, ValidationError};
use crate::models::exam::{
    QuestionCorrection, QuestionFeedback, StudentIdCorrection, StudentIdFeedback,
};
use crate::services::draft_store::{
    load_draft_map, question_draft_key, save_draft_map, student_id_draft_key, DraftStore,
};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tracing::{info, warn};

const UNKNOWN_FILE_NAME: &str = "unknown.jpg";

/// 需要人工确认学号的答案卷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentIdItem {
    pub image_url: String,
    /// 从 URL 中解出的文件名，也是草稿的 key
    pub file_name: String,
    pub value: String,
}

/// 需要人工确认答案的题目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionItem {
    pub question_number: String,
    pub recognized_answer: String,
    pub image_url: Option<String>,
    pub correct_answer: String,
}

/// 反馈服务
pub struct FeedbackService {
    api: Arc<dyn ExamApi>,
    store: Arc<dyn DraftStore>,
}

impl FeedbackService {
    pub fn new(api: Arc<dyn ExamApi>, store: Arc<dyn DraftStore>) -> Self {
        Self { api, store }
    }

    /// 加载学号不确定的答案卷，并合并草稿中的值
    pub async fn load_student_id_items(&self, exam_code: &str) -> AppResult<Vec<StudentIdItem>> {
        let urls = match self.api.unknown_images(exam_code).await {
            Ok(urls) => urls,
            Err(e) if e.is_gone() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let draft = load_draft_map(self.store.as_ref(), &student_id_draft_key(exam_code))?;

        let items: Vec<StudentIdItem> = urls
            .into_iter()
            .map(|url| {
                let file_name = file_name_from_url(&url);
                let value = draft.get(&file_name).cloned().unwrap_or_default();
                StudentIdItem {
                    image_url: url,
                    file_name,
                    value,
                }
            })
            .collect();

        info!("📋 学号待确认: {} 张 (考试 {})", items.len(), exam_code);
        Ok(items)
    }

    pub fn save_student_id_draft(&self, exam_code: &str, items: &[StudentIdItem]) -> Result<(), StoreError> {
        save_draft_map(
            self.store.as_ref(),
            &student_id_draft_key(exam_code),
            items
                .iter()
                .map(|item| (item.file_name.clone(), item.value.clone())),
        )
    }

    pub fn clear_student_id_draft(&self, exam_code: &str) -> Result<(), StoreError> {
        self.store.remove(&student_id_draft_key(exam_code))
    }

    /// 加载识别不确定的题目
    ///
    /// 后端没有报告（非成功状态）时视为没有需要确认的题目。
    pub async fn load_question_items(&self, exam_code: &str) -> AppResult<Vec<QuestionItem>> {
        let unknown = match self.api.unknown_questions(exam_code).await {
            Ok(list) => list,
            Err(ApiError::BadStatus { status, .. }) => {
                warn!("⚠️  未取得待确认题目 (status={})，按空列表处理", status);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        let draft = load_draft_map(self.store.as_ref(), &question_draft_key(exam_code))?;

        let items: Vec<QuestionItem> = unknown
            .into_iter()
            .enumerate()
            .map(|(index, q)| {
                let recognized = q.recognized_answer.unwrap_or_default();
                let question_number = q
                    .question_number
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("Q{}", index + 1));
                let correct_answer = draft
                    .get(&question_number)
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .unwrap_or_else(|| recognized.clone());
                QuestionItem {
                    question_number,
                    recognized_answer: recognized,
                    image_url: q.image_url,
                    correct_answer,
                }
            })
            .collect();

        info!("📋 题目待确认: {} 道 (考试 {})", items.len(), exam_code);
        Ok(items)
    }

    pub fn save_question_draft(&self, exam_code: &str, items: &[QuestionItem]) -> Result<(), StoreError> {
        save_draft_map(
            self.store.as_ref(),
            &question_draft_key(exam_code),
            items
                .iter()
                .map(|item| (item.question_number.clone(), item.correct_answer.clone())),
        )
    }

    pub fn clear_question_draft(&self, exam_code: &str) -> Result<(), StoreError> {
        self.store.remove(&question_draft_key(exam_code))
    }
}

/// 组装学号反馈，所有值都必须填写
pub fn student_id_payload(
    exam_code: &str,
    items: &[StudentIdItem],
) -> Result<StudentIdFeedback, ValidationError> {
    let missing = items.iter().filter(|i| i.value.trim().is_empty()).count();
    if missing > 0 {
        return Err(ValidationError::MissingStudentIds { missing });
    }
    Ok(StudentIdFeedback {
        exam_code: exam_code.to_string(),
        images: items
            .iter()
            .map(|item| StudentIdCorrection {
                file_name: item.file_name.clone(),
                student_id: item.value.trim().to_string(),
            })
            .collect(),
    })
}

/// 组装题目反馈，所有答案都必须填写
pub fn question_payload(
    exam_code: &str,
    items: &[QuestionItem],
) -> Result<QuestionFeedback, ValidationError> {
    let missing = items
        .iter()
        .filter(|i| i.correct_answer.trim().is_empty())
        .count();
    if missing > 0 {
        return Err(ValidationError::MissingAnswers { missing });
    }
    Ok(QuestionFeedback {
        exam_code: exam_code.to_string(),
        questions: items
            .iter()
            .map(|item| QuestionCorrection {
                question_number: item.question_number.clone(),
                correct_answer: item.correct_answer.clone(),
            })
            .collect(),
    })
}

/// URL 最后一段去掉查询串后解码；解码失败时保留原文，没有文件名时为 `unknown.jpg`
pub fn file_name_from_url(url: &str) -> String {
    let raw = url
        .split('/')
        .next_back()
        .and_then(|last| last.split('?').next())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_FILE_NAME);

    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::InMemoryExamApi;
    use crate::models::exam::UnknownQuestion;
    use crate::services::draft_store::MemoryDraftStore;

    fn service(api: &InMemoryExamApi) -> (FeedbackService, Arc<MemoryDraftStore>) {
        let store = Arc::new(MemoryDraftStore::new());
        let service = FeedbackService::new(Arc::new(api.clone()), store.clone());
        (service, store)
    }

    #[test]
    fn file_names_are_decoded() {
        assert_eq!(
            file_name_from_url("https://s3/bucket/AB12/%ED%99%8D%EA%B8%B8%EB%8F%99.jpg?X-Amz=1"),
            "홍길동.jpg"
        );
        assert_eq!(file_name_from_url("https://s3/bucket/"), "unknown.jpg");
        assert_eq!(file_name_from_url("https://s3/bad%FF.jpg"), "bad%FF.jpg");
    }

    #[tokio::test]
    async fn student_id_items_merge_draft() {
        let api = InMemoryExamApi::new();
        api.set_unknown_images(
            "AB12",
            vec![
                "https://s3/AB12/a.jpg?sig=1".to_string(),
                "https://s3/AB12/b.jpg".to_string(),
            ],
        );
        let (service, _store) = service(&api);

        let mut items = service.load_student_id_items("AB12").await.unwrap();
        items[0].value = "32201234".to_string();
        service.save_student_id_draft("AB12", &items).unwrap();

        let reloaded = service.load_student_id_items("AB12").await.unwrap();
        assert_eq!(reloaded[0].file_name, "a.jpg");
        assert_eq!(reloaded[0].value, "32201234");
        assert_eq!(reloaded[1].value, "");

        assert_eq!(
            student_id_payload("AB12", &reloaded),
            Err(ValidationError::MissingStudentIds { missing: 1 })
        );
    }

    #[tokio::test]
    async fn question_items_prefer_draft_then_recognized() {
        let api = InMemoryExamApi::new();
        api.set_unknown_questions(
            "AB12",
            vec![
                UnknownQuestion {
                    question_number: Some("3".into()),
                    recognized_answer: Some("B".into()),
                    image_url: None,
                },
                UnknownQuestion {
                    question_number: None,
                    recognized_answer: None,
                    image_url: None,
                },
            ],
        );
        let (service, store) = service(&api);
        store
            .set(&question_draft_key("AB12"), r#"{"3":"C"}"#)
            .unwrap();

        let items = service.load_question_items("AB12").await.unwrap();
        assert_eq!(items[0].correct_answer, "C");
        assert_eq!(items[1].question_number, "Q2");
        assert_eq!(items[1].correct_answer, "");
        assert!(question_payload("AB12", &items).is_err());
    }

    #[tokio::test]
    async fn missing_question_report_reads_as_empty() {
        let api = InMemoryExamApi::new();
        api.fail_with("unknown_questions", 404);
        let (service, _store) = service(&api);
        assert!(service.load_question_items("AB12").await.unwrap().is_empty());
    }
}
