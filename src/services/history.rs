//! 考试历史浏览
//!
//! 搜索、按年月分组、多选和批量删除。批量操作只作用于当前搜索结果中可见的考试。

use crate::clients::ExamApi;
use crate::error::ApiError;
use crate::models::exam::ExamHistoryItem;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// 同一年月的考试
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamGroup<'a> {
    /// `YYYY-MM`
    pub year_month: String,
    pub exams: Vec<&'a ExamHistoryItem>,
}

/// 批量删除结果
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub deleted: Vec<String>,
    /// `(exam_id, 错误)`
    pub failed: Vec<(String, ApiError)>,
}

impl BulkDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 名称、日期、代码拼接后做不区分大小写的子串匹配；空查询返回全部
pub fn filter_exams<'a>(exams: &'a [ExamHistoryItem], query: &str) -> Vec<&'a ExamHistoryItem> {
    let needle = query.trim().to_lowercase();
    exams
        .iter()
        .filter(|exam| needle.is_empty() || search_text(exam).contains(&needle))
        .collect()
}

fn search_text(exam: &ExamHistoryItem) -> String {
    format!(
        "{} {} {}",
        exam.exam_name,
        exam.exam_date,
        exam.code.as_deref().unwrap_or_default()
    )
    .to_lowercase()
}

/// 按日期前 7 个字符分组，新的月份在前，组内保持原顺序
pub fn group_exams<'a>(exams: &[&'a ExamHistoryItem]) -> Vec<ExamGroup<'a>> {
    let mut groups: BTreeMap<String, Vec<&'a ExamHistoryItem>> = BTreeMap::new();
    for exam in exams.iter().copied() {
        let key: String = exam.exam_date.chars().take(7).collect();
        groups.entry(key).or_default().push(exam);
    }
    groups
        .into_iter()
        .rev()
        .map(|(year_month, exams)| ExamGroup { year_month, exams })
        .collect()
}

/// 考试历史
#[derive(Debug, Default)]
pub struct HistoryBrowser {
    exams: Vec<ExamHistoryItem>,
    selected: HashSet<String>,
}

impl HistoryBrowser {
    pub fn new(exams: Vec<ExamHistoryItem>) -> Self {
        Self {
            exams,
            selected: HashSet::new(),
        }
    }

    /// 从后端加载
    pub async fn load(api: &dyn ExamApi) -> Result<Self, ApiError> {
        let exams = api.list_exams().await?;
        info!("📚 加载考试历史: {} 条", exams.len());
        Ok(Self::new(exams))
    }

    pub fn exams(&self) -> &[ExamHistoryItem] {
        &self.exams
    }

    pub fn filter(&self, query: &str) -> Vec<&ExamHistoryItem> {
        filter_exams(&self.exams, query)
    }

    pub fn grouped(&self, query: &str) -> Vec<ExamGroup<'_>> {
        group_exams(&self.filter(query))
    }

    pub fn is_selected(&self, exam_id: &str) -> bool {
        self.selected.contains(exam_id)
    }

    pub fn toggle(&mut self, exam_id: &str) {
        if !self.selected.remove(exam_id) {
            self.selected.insert(exam_id.to_string());
        }
    }

    /// 当前可见的考试中被选中的
    pub fn selected_visible(&self, query: &str) -> Vec<&ExamHistoryItem> {
        self.filter(query)
            .into_iter()
            .filter(|e| self.selected.contains(&e.exam_id))
            .collect()
    }

    /// 可见考试是否全部选中（按数量精确比较）
    pub fn is_all_selected(&self, query: &str) -> bool {
        let visible = self.filter(query).len();
        visible > 0 && self.selected_visible(query).len() == visible
    }

    /// 全选/取消全选当前可见的考试，隐藏的选择不受影响
    pub fn toggle_all(&mut self, query: &str) {
        let all_selected = self.is_all_selected(query);
        let visible: Vec<String> = self
            .filter(query)
            .into_iter()
            .map(|e| e.exam_id.clone())
            .collect();
        for id in visible {
            if all_selected {
                self.selected.remove(&id);
            } else {
                self.selected.insert(id);
            }
        }
    }

    /// 删除当前可见且被选中的考试
    pub async fn delete_selected(&mut self, api: &dyn ExamApi, query: &str) -> BulkDeleteReport {
        let targets: Vec<(String, Option<String>)> = self
            .selected_visible(query)
            .into_iter()
            .map(|e| (e.exam_id.clone(), e.code.clone()))
            .collect();

        let results = join_all(targets.iter().map(|(id, code)| async move {
            let result = match code {
                Some(code) => api.delete_exam_by_code(code).await,
                None => Err(ApiError::BadStatus {
                    endpoint: format!("exam {}", id),
                    status: 404,
                    body: Some("考试没有代码，无法删除".to_string()),
                }),
            };
            (id.clone(), result)
        }))
        .await;

        let mut report = BulkDeleteReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.deleted.push(id),
                Err(e) => {
                    warn!("⚠️  删除考试 {} 失败: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }

        let deleted: HashSet<&String> = report.deleted.iter().collect();
        self.exams.retain(|e| !deleted.contains(&e.exam_id));
        self.selected.retain(|id| !deleted.contains(id));

        info!(
            "🗑️  批量删除: 成功 {} / 失败 {}",
            report.deleted.len(),
            report.failed.len()
        );
        report
    }
}
