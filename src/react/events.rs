//! 任务执行事件：发布到 EventBus，供 UI 等观察者渲染
//!
//! 同一会话内的事件顺序与执行器发布顺序严格一致；不做持久化。

use serde::Serialize;
use serde_json::Value;

use crate::memory::Message;

/// 事件种类（按种类订阅）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserPrompt,
    AgentReply,
    ToolRequest,
    ToolResult,
    Error,
    Interrupt,
}

/// 事件负载（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// 用户提交的提示
    UserPrompt { prompt: String },
    /// 写入历史的 assistant 消息（可能带待执行工具调用）
    AgentReply { message: Message },
    /// 即将执行的工具调用（参数已解析）
    ToolRequest {
        tool_name: String,
        args: Value,
        tool_call_id: String,
    },
    /// 工具调用的结构化结果
    ToolResult { tool_call_id: String, result: Value },
    Error { error: String },
    /// 用户中断了正在运行的任务
    Interrupt,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub conversation_id: String,
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl AgentEvent {
    pub fn new(conversation_id: impl Into<String>, task_id: Option<&str>, payload: EventPayload) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            task_id: task_id.map(String::from),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::UserPrompt { .. } => EventKind::UserPrompt,
            EventPayload::AgentReply { .. } => EventKind::AgentReply,
            EventPayload::ToolRequest { .. } => EventKind::ToolRequest,
            EventPayload::ToolResult { .. } => EventKind::ToolResult,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::Interrupt => EventKind::Interrupt,
        }
    }

    pub fn user_prompt(conversation_id: &str, task_id: &str, prompt: &str) -> Self {
        Self::new(
            conversation_id,
            Some(task_id),
            EventPayload::UserPrompt {
                prompt: prompt.to_string(),
            },
        )
    }

    pub fn agent_reply(conversation_id: &str, task_id: &str, message: Message) -> Self {
        Self::new(conversation_id, Some(task_id), EventPayload::AgentReply { message })
    }

    pub fn tool_request(conversation_id: &str, task_id: &str, tool_name: &str, args: Value, tool_call_id: &str) -> Self {
        Self::new(
            conversation_id,
            Some(task_id),
            EventPayload::ToolRequest {
                tool_name: tool_name.to_string(),
                args,
                tool_call_id: tool_call_id.to_string(),
            },
        )
    }

    pub fn tool_result(conversation_id: &str, task_id: &str, tool_call_id: &str, result: Value) -> Self {
        Self::new(
            conversation_id,
            Some(task_id),
            EventPayload::ToolResult {
                tool_call_id: tool_call_id.to_string(),
                result,
            },
        )
    }

    pub fn error(conversation_id: &str, task_id: Option<&str>, error: impl Into<String>) -> Self {
        Self::new(conversation_id, task_id, EventPayload::Error { error: error.into() })
    }

    pub fn interrupt(conversation_id: &str, task_id: &str) -> Self {
        Self::new(conversation_id, Some(task_id), EventPayload::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat_with_type_tag() {
        let ev = AgentEvent::tool_request("c1", "t1", "shell_run", serde_json::json!({"cmd": "ls"}), "call_1");
        assert_eq!(ev.kind(), EventKind::ToolRequest);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_request");
        assert_eq!(v["conversation_id"], "c1");
        assert_eq!(v["args"]["cmd"], "ls");
    }

    #[test]
    fn test_error_event_without_task() {
        let ev = AgentEvent::error("c1", None, "boom");
        assert_eq!(ev.kind(), EventKind::Error);
        assert!(ev.task_id.is_none());
    }
}
