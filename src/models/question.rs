use serde::{Deserialize, Serialize};

/// 题型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuestionType {
    /// 选择题
    #[default]
    #[serde(rename = "multiple")]
    MultipleChoice,
    /// 简答题
    #[serde(rename = "short")]
    ShortAnswer,
    /// 判断题（O/X）
    #[serde(rename = "ox")]
    TrueFalse,
}

impl QuestionType {
    /// 接口中使用的名称
    pub fn wire_name(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple",
            QuestionType::ShortAnswer => "short",
            QuestionType::TrueFalse => "ox",
        }
    }

    /// 从接口名称解析题型
    pub fn from_wire_name(s: &str) -> Option<Self> {
        match s.trim() {
            "multiple" => Some(QuestionType::MultipleChoice),
            "short" => Some(QuestionType::ShortAnswer),
            "ox" => Some(QuestionType::TrueFalse),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// 小题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: String,
    pub text: String,
    #[serde(deserialize_with = "deserialize_score")]
    pub score: f64,
    #[serde(rename = "type", default)]
    pub kind: QuestionType,
}

impl SubQuestion {
    pub fn new(score: f64) -> Self {
        Self {
            id: new_entry_id(),
            text: String::new(),
            score,
            kind: QuestionType::default(),
        }
    }
}

/// 大题
///
/// 有小题时 `score` 由小题配分求和得出，不能单独修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(deserialize_with = "deserialize_score")]
    pub score: f64,
    #[serde(rename = "type", default)]
    pub kind: QuestionType,
    #[serde(rename = "subQuestions", default)]
    pub sub_questions: Vec<SubQuestion>,
}

impl Question {
    pub fn new(score: f64) -> Self {
        Self {
            id: new_entry_id(),
            text: String::new(),
            score,
            kind: QuestionType::default(),
            sub_questions: Vec::new(),
        }
    }

    pub fn has_sub_questions(&self) -> bool {
        !self.sub_questions.is_empty()
    }

    /// 小题配分之和
    pub fn sub_score_sum(&self) -> f64 {
        self.sub_questions
            .iter()
            .map(|sq| sq.score)
            .filter(|s| s.is_finite())
            .sum()
    }

    /// 有小题时重新计算派生配分
    pub(crate) fn recompute_score(&mut self) {
        if self.has_sub_questions() {
            self.score = self.sub_score_sum();
        }
    }
}

/// 生成新的题目 ID（客户端生成，不复用）
pub fn new_entry_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 配分可能是数字也可能是字符串，无法解析时按 0 处理
fn deserialize_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;
    use std::fmt;

    struct ScoreVisitor;

    impl<'de> Visitor<'de> for ScoreVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as f64)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as f64)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(if value.is_finite() { value } else { 0.0 })
        }
    }

    deserializer.deserialize_any(ScoreVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_type_uses_short_wire_names() {
        let json = serde_json::to_string(&QuestionType::TrueFalse).unwrap();
        assert_eq!(json, "\"ox\"");
        assert_eq!(
            QuestionType::from_wire_name("short"),
            Some(QuestionType::ShortAnswer)
        );
        assert_eq!(QuestionType::from_wire_name("essay"), None);
    }

    #[test]
    fn score_accepts_numeric_strings() {
        let q: Question = serde_json::from_str(
            r#"{"id":"q1","text":"3","score":"2.5","type":"multiple","subQuestions":[]}"#,
        )
        .unwrap();
        assert_eq!(q.score, 2.5);

        let q: Question =
            serde_json::from_str(r#"{"id":"q2","text":"","score":"abc","type":"short"}"#).unwrap();
        assert_eq!(q.score, 0.0);
        assert_eq!(q.kind, QuestionType::ShortAnswer);
    }

    #[test]
    fn serializes_with_camel_case_sub_questions() {
        let mut q = Question::new(0.0);
        q.sub_questions.push(SubQuestion::new(3.0));
        let value = serde_json::to_value(&q).unwrap();
        assert!(value.get("subQuestions").is_some());
        assert_eq!(value["type"], "multiple");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(new_entry_id(), new_entry_id());
    }
}
