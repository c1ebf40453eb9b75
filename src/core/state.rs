//! 会话状态：有序历史 + 运行标记
//!
//! 共享于 Agent 与执行器之间（std Mutex，任何 await 前释放）。历史只追加，
//! 系统提示不进入历史，仅在构造模型输入时前置。

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::memory::Message;

pub type SharedState = Arc<Mutex<ConversationState>>;

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub id: String,
    pub system_prompt: String,
    history: Vec<Message>,
    /// 执行器正在处理一个任务
    pub running: bool,
    pub current_task_id: Option<String>,
}

impl ConversationState {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system_prompt: system_prompt.into(),
            history: Vec::new(),
            running: false,
            current_task_id: None,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn begin_task(&mut self, task_id: &str) {
        self.running = true;
        self.current_task_id = Some(task_id.to_string());
    }

    pub fn finish_task(&mut self) {
        self.running = false;
        self.current_task_id = None;
    }

    /// 模型输入：系统提示（非空时）+ 当前历史快照
    pub fn model_input(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages
    }
}

/// 取锁；中毒时沿用内部数据
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, ConversationState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    #[test]
    fn test_model_input_prepends_system_prompt() {
        let mut state = ConversationState::new("c1", "be brief");
        state.append(Message::user("hi"));
        let input = state.model_input();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0].role(), Role::System);
        assert_eq!(input[0].content(), "be brief");
        assert_eq!(state.history().len(), 1);

        let mut bare = ConversationState::new("c2", "");
        bare.append(Message::user("hi"));
        assert_eq!(bare.model_input().len(), 1);
    }

    #[test]
    fn test_task_lifecycle_flags() {
        let mut state = ConversationState::new("c1", "");
        state.begin_task("t1");
        assert!(state.running);
        assert_eq!(state.current_task_id.as_deref(), Some("t1"));
        state.finish_task();
        assert!(!state.running);
        assert!(state.current_task_id.is_none());
    }
}
