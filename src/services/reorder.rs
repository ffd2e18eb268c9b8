//! 拖拽排序
//!
//! 先取出再插入，其他元素的相对顺序不变。
//! 大题列表和某一大题下的小题列表使用同一套规则，跨列表拖拽不生效。

use crate::models::answer_key::AnswerKey;

/// 拖拽所在的列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    /// 大题列表
    Questions,
    /// 某一大题下的小题列表
    SubQuestions { parent_id: String },
}

/// 一次拖拽放下
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragDrop {
    pub origin: ListScope,
    pub destination: ListScope,
    pub source_index: usize,
    pub target_index: usize,
}

impl DragDrop {
    /// 同一列表内的拖拽
    pub fn within(scope: ListScope, source_index: usize, target_index: usize) -> Self {
        Self {
            origin: scope.clone(),
            destination: scope,
            source_index,
            target_index,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.origin != self.destination || self.source_index == self.target_index
    }
}

/// 把 `source` 位置的元素移动到 `target`
///
/// 下标越界时原样返回。
pub fn move_item<T: Clone>(items: &[T], source: usize, target: usize) -> Vec<T> {
    let mut moved = items.to_vec();
    if source == target || source >= moved.len() {
        return moved;
    }
    let item = moved.remove(source);
    let target = target.min(moved.len());
    moved.insert(target, item);
    moved
}

/// 把拖拽结果应用到答案表
pub fn apply_drop(key: &AnswerKey, drop: &DragDrop) -> AnswerKey {
    if drop.is_noop() {
        return key.clone();
    }

    match &drop.destination {
        ListScope::Questions => key.with_question_order(move_item(
            key.questions(),
            drop.source_index,
            drop.target_index,
        )),
        ListScope::SubQuestions { parent_id } => match key.question(parent_id) {
            Some(question) => key.with_sub_question_order(
                parent_id,
                move_item(&question.sub_questions, drop.source_index, drop.target_index),
            ),
            None => key.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_forward_and_backward() {
        let items = vec!["a", "b", "c", "d"];
        assert_eq!(move_item(&items, 0, 2), vec!["b", "c", "a", "d"]);
        assert_eq!(move_item(&items, 3, 1), vec!["a", "d", "b", "c"]);
        assert_eq!(move_item(&items, 1, 1), items);
        assert_eq!(move_item(&items, 9, 0), items);
        assert_eq!(move_item(&items, 0, 99), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn question_drop_keeps_ids_and_scores() {
        let key = AnswerKey::new().add_question().add_question();
        let ids: Vec<String> = key.questions().iter().map(|q| q.id.clone()).collect();

        let moved = apply_drop(&key, &DragDrop::within(ListScope::Questions, 2, 0));
        let moved_ids: Vec<String> = moved.questions().iter().map(|q| q.id.clone()).collect();
        assert_eq!(moved_ids, vec![ids[2].clone(), ids[0].clone(), ids[1].clone()]);
        assert_eq!(moved.total_score(), key.total_score());
    }

    #[test]
    fn sub_question_drop_is_scoped_to_parent() {
        let key = AnswerKey::new();
        let parent = key.questions()[0].id.clone();
        let key = key.add_sub_question(&parent).add_sub_question(&parent);
        let subs: Vec<String> = key.questions()[0]
            .sub_questions
            .iter()
            .map(|s| s.id.clone())
            .collect();

        let scope = ListScope::SubQuestions {
            parent_id: parent.clone(),
        };
        let moved = apply_drop(&key, &DragDrop::within(scope, 1, 0));
        assert_eq!(moved.questions()[0].sub_questions[0].id, subs[1]);
    }

    #[test]
    fn cross_parent_drop_is_rejected() {
        let key = AnswerKey::new().add_question();
        let first = key.questions()[0].id.clone();
        let second = key.questions()[1].id.clone();
        let key = key
            .add_sub_question(&first)
            .add_sub_question(&first)
            .add_sub_question(&second);

        let drop = DragDrop {
            origin: ListScope::SubQuestions { parent_id: first },
            destination: ListScope::SubQuestions { parent_id: second },
            source_index: 0,
            target_index: 0,
        };
        assert_eq!(apply_drop(&key, &drop), key);
    }
}
