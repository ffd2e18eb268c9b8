//! 答案表模型
//!
//! 每个修改操作都返回新的快照，原快照保持不变；
//! 有小题的大题，其配分在每次修改后同步重新计算。

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::question::{Question, QuestionType, SubQuestion};

/// 大题的部分修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionPatch {
    pub text: Option<String>,
    pub score: Option<f64>,
    pub kind: Option<QuestionType>,
}

/// 小题的部分修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubQuestionPatch {
    pub text: Option<String>,
    pub score: Option<f64>,
    pub kind: Option<QuestionType>,
}

impl QuestionPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Default::default()
        }
    }
}

impl SubQuestionPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Default::default()
        }
    }
}

/// 题号预览中的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingRow {
    pub number: usize,
    pub sub_labels: Vec<String>,
}

/// 答案表（有序的大题列表）
///
/// 反序列化经过 `from_questions`，派生配分不信任外部输入。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Question>", into = "Vec<Question>")]
pub struct AnswerKey {
    questions: Vec<Question>,
}

impl From<Vec<Question>> for AnswerKey {
    fn from(questions: Vec<Question>) -> Self {
        Self::from_questions(questions)
    }
}

impl From<AnswerKey> for Vec<Question> {
    fn from(key: AnswerKey) -> Self {
        key.questions
    }
}

impl AnswerKey {
    /// 新表单默认带一道空题
    pub fn new() -> Self {
        Self {
            questions: vec![Question::new(0.0)],
        }
    }

    /// 用已有题目构造，派生配分会被重新计算
    pub fn from_questions(questions: Vec<Question>) -> Self {
        let mut questions = questions;
        questions.iter_mut().for_each(Question::recompute_score);
        Self { questions }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn into_questions(self) -> Vec<Question> {
        self.questions
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.questions.iter().position(|q| q.id == id)
    }

    // ========== 大题操作 ==========

    /// 追加一道题，配分沿用上一道题
    pub fn add_question(&self) -> Self {
        let score = self.questions.last().map(|q| q.score).unwrap_or(0.0);
        let mut questions = self.questions.clone();
        questions.push(Question::new(score));
        Self { questions }
    }

    pub fn remove_question(&self, id: &str) -> Self {
        Self {
            questions: self
                .questions
                .iter()
                .filter(|q| q.id != id)
                .cloned()
                .collect(),
        }
    }

    /// 合并字段；有小题时忽略 patch 中的配分
    pub fn update_question(&self, id: &str, patch: &QuestionPatch) -> Self {
        self.map_question(id, |q| {
            if let Some(text) = &patch.text {
                q.text = text.clone();
            }
            if let Some(kind) = patch.kind {
                q.kind = kind;
            }
            if let Some(score) = patch.score {
                if !q.has_sub_questions() {
                    q.score = score;
                }
            }
        })
    }

    /// 以新的顺序替换大题列表（用于拖拽排序）
    pub fn with_question_order(&self, questions: Vec<Question>) -> Self {
        Self::from_questions(questions)
    }

    // ========== 小题操作 ==========

    /// 追加小题，配分沿用该题最后一个小题（没有则为 0）
    pub fn add_sub_question(&self, q_id: &str) -> Self {
        self.map_question(q_id, |q| {
            let score = q.sub_questions.last().map(|sq| sq.score).unwrap_or(0.0);
            q.sub_questions.push(SubQuestion::new(score));
            q.text.clear();
        })
    }

    /// 在 `after_index` 之后插入小题，配分沿用该位置的小题
    pub fn insert_sub_question(&self, q_id: &str, after_index: usize) -> Self {
        self.map_question(q_id, |q| {
            let score = q
                .sub_questions
                .get(after_index)
                .map(|sq| sq.score)
                .unwrap_or(0.0);
            let at = (after_index + 1).min(q.sub_questions.len());
            q.sub_questions.insert(at, SubQuestion::new(score));
            q.text.clear();
        })
    }

    pub fn remove_sub_question(&self, q_id: &str, sq_id: &str) -> Self {
        self.map_question(q_id, |q| {
            q.sub_questions.retain(|sq| sq.id != sq_id);
        })
    }

    pub fn update_sub_question(&self, q_id: &str, sq_id: &str, patch: &SubQuestionPatch) -> Self {
        self.map_question(q_id, |q| {
            if let Some(sq) = q.sub_questions.iter_mut().find(|sq| sq.id == sq_id) {
                if let Some(text) = &patch.text {
                    sq.text = text.clone();
                }
                if let Some(score) = patch.score {
                    sq.score = score;
                }
                if let Some(kind) = patch.kind {
                    sq.kind = kind;
                }
            }
        })
    }

    /// 以新的顺序替换某道题的小题列表
    pub fn with_sub_question_order(&self, q_id: &str, subs: Vec<SubQuestion>) -> Self {
        self.map_question(q_id, |q| q.sub_questions = subs)
    }

    fn map_question(&self, id: &str, f: impl FnOnce(&mut Question)) -> Self {
        let mut questions = self.questions.clone();
        if let Some(q) = questions.iter_mut().find(|q| q.id == id) {
            f(q);
            q.recompute_score();
        }
        Self { questions }
    }

    // ========== 汇总 ==========

    pub fn total_score(&self) -> f64 {
        self.questions
            .iter()
            .map(|q| q.score)
            .filter(|s| s.is_finite())
            .sum()
    }

    pub fn total_sub_count(&self) -> usize {
        self.questions.iter().map(|q| q.sub_questions.len()).sum()
    }

    /// 题号预览：`"<题号>-<小题号>"`，题号由位置推导，不存储
    pub fn numbering_preview(&self) -> Vec<NumberingRow> {
        self.questions
            .iter()
            .enumerate()
            .map(|(q_index, q)| NumberingRow {
                number: q_index + 1,
                sub_labels: (0..q.sub_questions.len())
                    .map(|s_index| sub_label(q_index, s_index))
                    .collect(),
            })
            .collect()
    }

    /// 提交前校验：每个叶子条目要么有答案，要么配分非 0
    ///
    /// 按文档顺序扫描，遇到第一个不合格条目即返回。
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.questions.is_empty() {
            return Err(ValidationError::EmptyAnswerKey);
        }
        for (q_index, q) in self.questions.iter().enumerate() {
            if q.has_sub_questions() {
                for (s_index, sq) in q.sub_questions.iter().enumerate() {
                    if is_blank_entry(&sq.text, sq.score) {
                        return Err(ValidationError::IncompleteEntry {
                            label: sub_label(q_index, s_index),
                        });
                    }
                }
            } else if is_blank_entry(&q.text, q.score) {
                return Err(ValidationError::IncompleteEntry {
                    label: (q_index + 1).to_string(),
                });
            }
        }
        Ok(())
    }
}

fn sub_label(q_index: usize, s_index: usize) -> String {
    format!("{}-{}", q_index + 1, s_index + 1)
}

fn is_blank_entry(text: &str, score: f64) -> bool {
    text.trim().is_empty() && (score == 0.0 || !score.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_derived_scores(key: &AnswerKey) {
        for q in key.questions() {
            if q.has_sub_questions() {
                assert_eq!(q.score, q.sub_score_sum(), "question {}", q.id);
            }
        }
    }

    #[test]
    fn new_question_inherits_previous_score() {
        let key = AnswerKey::new();
        let first = key.questions()[0].id.clone();
        let key = key.update_question(&first, &QuestionPatch::score(4.0));
        let key = key.add_question();
        assert_eq!(key.len(), 2);
        assert_eq!(key.questions()[1].score, 4.0);
    }

    #[test]
    fn add_question_on_empty_key_appends_zero_score() {
        let key = AnswerKey::default().add_question();
        assert_eq!(key.len(), 1);
        assert_eq!(key.questions()[0].score, 0.0);
    }

    #[test]
    fn operations_do_not_touch_the_previous_snapshot() {
        let before = AnswerKey::new();
        let after = before.add_question();
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn sub_questions_drive_the_parent_score() {
        let key = AnswerKey::new();
        let q = key.questions()[0].id.clone();
        let key = key.update_question(&q, &QuestionPatch::text("ignored later"));
        let key = key.add_sub_question(&q);
        assert_eq!(key.questions()[0].text, "");

        let sq1 = key.questions()[0].sub_questions[0].id.clone();
        let key = key.update_sub_question(&q, &sq1, &SubQuestionPatch::score(5.0));
        let key = key.add_sub_question(&q);
        assert_eq!(key.questions()[0].sub_questions[1].score, 5.0);
        assert_eq!(key.questions()[0].score, 10.0);
        assert_derived_scores(&key);

        // 派生配分不能被直接修改
        let key = key.update_question(&q, &QuestionPatch::score(99.0));
        assert_eq!(key.questions()[0].score, 10.0);

        let key = key.remove_sub_question(&q, &sq1);
        assert_eq!(key.questions()[0].score, 5.0);
        assert_derived_scores(&key);
    }

    #[test]
    fn insert_sub_question_places_after_index_and_inherits() {
        let key = AnswerKey::new();
        let q = key.questions()[0].id.clone();
        let key = key.add_sub_question(&q).add_sub_question(&q);
        let first = key.questions()[0].sub_questions[0].id.clone();
        let key = key.update_sub_question(&q, &first, &SubQuestionPatch::score(7.0));
        let key = key.insert_sub_question(&q, 0);

        let subs = &key.questions()[0].sub_questions;
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].id, first);
        assert_eq!(subs[1].score, 7.0);
        assert_eq!(key.questions()[0].score, 7.0 + 7.0 + 0.0);
        assert_derived_scores(&key);
    }

    #[test]
    fn totals_and_numbering_follow_order() {
        let key = AnswerKey::new();
        let q1 = key.questions()[0].id.clone();
        let key = key.add_sub_question(&q1).add_sub_question(&q1).add_question();
        let q2 = key.questions()[1].id.clone();
        let key = key.update_question(&q2, &QuestionPatch::score(3.0));

        assert_eq!(key.total_sub_count(), 2);
        assert_eq!(key.total_score(), 3.0);
        let preview = key.numbering_preview();
        assert_eq!(preview[0].sub_labels, vec!["1-1", "1-2"]);
        assert_eq!(preview[1].number, 2);
        assert!(preview[1].sub_labels.is_empty());
    }

    #[test]
    fn validation_reports_first_offender_only() {
        let key = AnswerKey::new();
        let q1 = key.questions()[0].id.clone();
        let key = key
            .add_sub_question(&q1)
            .add_sub_question(&q1)
            .add_question();
        let first = key.questions()[0].sub_questions[0].id.clone();
        let key = key.update_sub_question(&q1, &first, &SubQuestionPatch::text("A"));

        // 1-2 和 2 都不合格，只报告 1-2
        assert_eq!(
            key.validate(),
            Err(ValidationError::IncompleteEntry {
                label: "1-2".into()
            })
        );
    }

    #[test]
    fn score_alone_satisfies_validation() {
        let key = AnswerKey::new();
        let q = key.questions()[0].id.clone();
        let key = key.update_question(&q, &QuestionPatch::score(2.0));
        assert!(key.validate().is_ok());
        assert_eq!(
            AnswerKey::default().validate(),
            Err(ValidationError::EmptyAnswerKey)
        );
    }

    #[test]
    fn deserialized_key_recomputes_parent_score() {
        let raw = r#"[
            {"id": "q1", "text": "", "score": 99, "subQuestions": [
                {"id": "s1", "text": "A", "score": 3},
                {"id": "s2", "text": "B", "score": "4.5"}
            ]},
            {"id": "q2", "text": "C", "score": 2}
        ]"#;
        let key: AnswerKey = serde_json::from_str(raw).unwrap();
        assert_eq!(key.questions()[0].score, 7.5);
        assert_eq!(key.questions()[1].score, 2.0);
        assert_derived_scores(&key);

        let written = serde_json::to_value(&key).unwrap();
        assert!(written.is_array());
        assert_eq!(written[0]["score"], 7.5);
    }
}
