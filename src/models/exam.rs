use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::models::answer_key::AnswerKey;
use crate::models::question::Question;

/// 提交前的考试草稿
#[derive(Debug, Clone, Default)]
pub struct ExamDraft {
    pub exam_name: String,
    pub exam_date: String,
    pub attendance_file: Option<PathBuf>,
    pub answer_sheet_files: Vec<PathBuf>,
    pub answer_key: AnswerKey,
}

impl ExamDraft {
    /// 按顺序校验：考试信息 → 出勤表 → 答案表
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exam_name.trim().is_empty() || self.exam_date.trim().is_empty() {
            return Err(ValidationError::MissingExamInfo);
        }
        if self.attendance_file.is_none() {
            return Err(ValidationError::MissingAttendance);
        }
        self.answer_key.validate()
    }
}

/// `POST /exams` 请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExamRequest {
    pub exam_name: String,
    pub exam_date: String,
}

/// `POST /exams` 响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedExam {
    #[serde(deserialize_with = "deserialize_id")]
    pub exam_id: String,
    pub exam_code: String,
    pub exam_name: String,
    pub exam_date: String,
}

/// 历史列表中的考试
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamHistoryItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub exam_id: String,
    pub exam_name: String,
    #[serde(default)]
    pub exam_date: String,
    #[serde(default, alias = "examCode")]
    pub code: Option<String>,
}

/// `POST /questions` 请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveQuestionsRequest<'a> {
    pub exam_id: &'a str,
    pub questions: &'a [Question],
}

/// 批量预签名请求中的一张图片
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignImage {
    pub index: usize,
    pub content_type: String,
    pub filename: String,
}

/// 批量预签名请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPresignRequest {
    pub exam_code: String,
    pub images: Vec<PresignImage>,
}

/// 预签名上传地址
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignedUrl {
    pub index: usize,
    pub filename: String,
    pub url: String,
}

/// 批量预签名响应
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPresignResponse {
    #[serde(default)]
    pub exam_code: String,
    pub urls: Vec<PresignedUrl>,
}

/// 学号反馈中的一张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdCorrection {
    pub file_name: String,
    #[serde(rename = "student_id")]
    pub student_id: String,
}

/// `POST /feedback` 请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdFeedback {
    pub exam_code: String,
    pub images: Vec<StudentIdCorrection>,
}

/// 题目反馈中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionCorrection {
    pub question_number: String,
    pub correct_answer: String,
}

/// `POST /question-feedback` 请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFeedback {
    pub exam_code: String,
    pub questions: Vec<QuestionCorrection>,
}

/// 识别不确定的题目（`GET /reports/unknown-questions/{code}`）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownQuestion {
    #[serde(default)]
    pub question_number: Option<String>,
    #[serde(default)]
    pub recognized_answer: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// ID 可能是字符串也可能是整数
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;
    use std::fmt;

    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer id")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::answer_key::QuestionPatch;

    #[test]
    fn created_exam_accepts_numeric_id() {
        let exam: CreatedExam = serde_json::from_str(
            r#"{"examId":42,"examCode":"ND1FHG","examName":"중간고사","examDate":"2025-09-01"}"#,
        )
        .unwrap();
        assert_eq!(exam.exam_id, "42");
        assert_eq!(exam.exam_code, "ND1FHG");
    }

    #[test]
    fn history_item_reads_exam_code_alias() {
        let item: ExamHistoryItem = serde_json::from_str(
            r#"{"examId":"7","examName":"기말","examDate":"2025-12-01","examCode":"AB12"}"#,
        )
        .unwrap();
        assert_eq!(item.code.as_deref(), Some("AB12"));
    }

    #[test]
    fn student_feedback_uses_snake_case_student_id() {
        let payload = StudentIdFeedback {
            exam_code: "AB12".into(),
            images: vec![StudentIdCorrection {
                file_name: "a.jpg".into(),
                student_id: "32201234".into(),
            }],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["examCode"], "AB12");
        assert_eq!(value["images"][0]["student_id"], "32201234");
        assert_eq!(value["images"][0]["fileName"], "a.jpg");
    }

    #[test]
    fn draft_validation_order() {
        let mut draft = ExamDraft::default();
        assert_eq!(draft.validate(), Err(ValidationError::MissingExamInfo));

        draft.exam_name = "중간고사".into();
        draft.exam_date = "2025-09-01".into();
        assert_eq!(draft.validate(), Err(ValidationError::MissingAttendance));

        draft.attendance_file = Some(PathBuf::from("attendance.xlsx"));
        draft.answer_key = AnswerKey::new();
        assert!(matches!(
            draft.validate(),
            Err(ValidationError::IncompleteEntry { .. })
        ));

        let q = draft.answer_key.questions()[0].id.clone();
        draft.answer_key = draft.answer_key.update_question(&q, &QuestionPatch::text("3"));
        assert!(draft.validate().is_ok());
    }
}
