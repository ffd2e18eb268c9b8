use crate::error::{AppError, AppResult, FileError};
use crate::models::answer_key::AnswerKey;
use crate::models::exam::ExamDraft;
use crate::models::question::{new_entry_id, Question, QuestionType, SubQuestion};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 答案卷支持的图片扩展名
const SHEET_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// TOML 草稿文件结构
#[derive(Debug, Deserialize)]
struct DraftFile {
    exam_name: String,
    exam_date: String,
    attendance_file: Option<PathBuf>,
    #[serde(default)]
    answer_sheet_files: Vec<PathBuf>,
    /// 指定后扫描目录中的图片作为答案卷
    answer_sheet_dir: Option<PathBuf>,
    #[serde(default)]
    questions: Vec<DraftQuestion>,
}

#[derive(Debug, Deserialize)]
struct DraftQuestion {
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: f64,
    #[serde(rename = "type", default)]
    kind: QuestionType,
    #[serde(default)]
    sub_questions: Vec<DraftSubQuestion>,
}

#[derive(Debug, Deserialize)]
struct DraftSubQuestion {
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: f64,
    #[serde(rename = "type", default)]
    kind: QuestionType,
}

/// 从 TOML 文件加载考试草稿
///
/// 相对路径以草稿文件所在目录为基准。
pub async fn load_exam_draft(toml_file_path: &Path) -> AppResult<ExamDraft> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| AppError::file_read_failed(toml_file_path.display().to_string(), e))?;

    let file: DraftFile = toml::from_str(&content).map_err(|e| FileError::TomlParseFailed {
        path: toml_file_path.display().to_string(),
        source: e,
    })?;

    let base = toml_file_path.parent().unwrap_or_else(|| Path::new("."));

    let mut answer_sheet_files: Vec<PathBuf> = file
        .answer_sheet_files
        .iter()
        .map(|p| base.join(p))
        .collect();
    if let Some(dir) = &file.answer_sheet_dir {
        answer_sheet_files.extend(load_sheet_dir(&base.join(dir)).await?);
    }

    let questions = file.questions.into_iter().map(into_question).collect();

    Ok(ExamDraft {
        exam_name: file.exam_name,
        exam_date: file.exam_date,
        attendance_file: file.attendance_file.map(|p| base.join(p)),
        answer_sheet_files,
        answer_key: AnswerKey::from_questions(questions),
    })
}

/// 扫描目录中的答案卷图片，按文件名排序
pub async fn load_sheet_dir(folder: &Path) -> AppResult<Vec<PathBuf>> {
    if !folder.exists() {
        return Err(FileError::NotFound {
            path: folder.display().to_string(),
        }
        .into());
    }

    let mut sheets = Vec::new();
    let mut entries = fs::read_dir(folder)
        .await
        .map_err(|e| AppError::file_read_failed(folder.display().to_string(), e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::file_read_failed(folder.display().to_string(), e))?
    {
        let path = entry.path();
        let is_sheet = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| SHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_sheet {
            sheets.push(path);
        }
    }

    sheets.sort();
    tracing::info!("在 {} 中找到 {} 张答案卷", folder.display(), sheets.len());
    Ok(sheets)
}

fn into_question(q: DraftQuestion) -> Question {
    Question {
        id: new_entry_id(),
        text: q.text,
        score: q.score,
        kind: q.kind,
        sub_questions: q
            .sub_questions
            .into_iter()
            .map(|sq| SubQuestion {
                id: new_entry_id(),
                text: sq.text,
                score: sq.score,
                kind: sq.kind,
            })
            .collect(),
    }
}
