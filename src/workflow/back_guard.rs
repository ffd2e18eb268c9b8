//! 后退拦截
//!
//! 流程进行中（非 Input、非终止状态）后退需要用户确认；
//! 用户拒绝时压入当前路由，保持历史位置与服务端任务一致。

use crate::workflow::stage::Stage;

/// 浏览历史
pub trait NavigationHistory {
    /// 压入一条与当前位置相同的记录
    fn push_sentinel(&mut self, route: &str);
}

/// 内存中的浏览历史
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteHistory {
    entries: Vec<String>,
}

impl RouteHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: impl Into<String>) {
        self.entries.push(route.into());
    }

    pub fn current(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NavigationHistory for RouteHistory {
    fn push_sentinel(&mut self, route: &str) {
        self.entries.push(route.to_string());
    }
}

/// 后退的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackDecision {
    /// 不需要拦截
    PassThrough,
    /// 用户确认离开
    Leave,
    /// 用户选择留下，已压入哨兵记录
    Stay,
}

/// 处理一次后退
///
/// `confirm` 只在需要拦截时调用。
pub fn on_back_attempt(
    stage: &Stage,
    current_route: &str,
    confirm: impl FnOnce() -> bool,
    history: &mut dyn NavigationHistory,
) -> BackDecision {
    if !stage.guards_back_navigation() {
        return BackDecision::PassThrough;
    }
    if confirm() {
        BackDecision::Leave
    } else {
        history.push_sentinel(current_route);
        BackDecision::Stay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declining_pushes_current_route() {
        let mut history = RouteHistory::new();
        history.push("/exam/AB12/loading/question");
        let decision = on_back_attempt(
            &Stage::QuestionRecognizing,
            "/exam/AB12/loading/question",
            || false,
            &mut history,
        );
        assert_eq!(decision, BackDecision::Stay);
        assert_eq!(history.len(), 2);
        assert_eq!(history.current(), Some("/exam/AB12/loading/question"));
    }

    #[test]
    fn input_and_terminal_stages_are_not_guarded() {
        let mut history = RouteHistory::new();
        let mut asked = false;
        let decision = on_back_attempt(&Stage::Input, "/", || {
            asked = true;
            true
        }, &mut history);
        assert_eq!(decision, BackDecision::PassThrough);
        assert!(!asked);
        assert_eq!(
            on_back_attempt(&Stage::Done, "/exam/AB12/done", || false, &mut history),
            BackDecision::PassThrough
        );
        assert!(history.is_empty());
    }

    #[test]
    fn confirming_leaves() {
        let mut history = RouteHistory::new();
        assert_eq!(
            on_back_attempt(&Stage::Grading, "/exam/AB12/loading/grading", || true, &mut history),
            BackDecision::Leave
        );
        assert!(history.is_empty());
    }
}
