//! 会话消息：不可变记录
//!
//! Message 创建后只会被追加进历史，不再修改；metadata 携带按角色区分的负载：
//! assistant 消息可带待执行的工具调用列表（`tool_calls`），tool 消息带 `tool_call_id`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// metadata 中待执行工具调用列表的键
pub const TOOL_CALLS_KEY: &str = "tool_calls";
/// metadata 中工具结果所属调用 id 的键
pub const TOOL_CALL_ID_KEY: &str = "tool_call_id";

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
    Error,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
            Role::Error => "error",
        }
    }
}

/// 模型发起的单个工具调用请求；arguments 为模型给出的原始 JSON 文本，由执行器解析
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 单条消息（不可变）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    id: String,
    role: Role,
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content)
    }

    /// 带待执行工具调用的 assistant 消息
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: &[ToolCallRequest]) -> Self {
        let calls = serde_json::to_value(calls).unwrap_or_else(|_| Value::Array(Vec::new()));
        Self::assistant(content).with_metadata(TOOL_CALLS_KEY, calls)
    }

    /// 工具结果消息，按调用 id 标记
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content).with_metadata(TOOL_CALL_ID_KEY, Value::String(tool_call_id.into()))
    }

    /// 构造阶段附加 metadata（消息进入历史前使用）
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// metadata 中的待执行工具调用；非 assistant 或未携带时为空
    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.metadata
            .get(TOOL_CALLS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.metadata.get(TOOL_CALL_ID_KEY).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_tool_calls_metadata() {
        let calls = vec![
            ToolCallRequest::new("call_1", "shell_run", r#"{"cmd":"ls"}"#),
            ToolCallRequest::new("call_2", "fs_read", r#"{"path":"a.txt"}"#),
        ];
        let msg = Message::assistant_with_tool_calls("", &calls);
        assert_eq!(msg.role(), Role::Assistant);
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls(), calls);
        assert!(msg.tool_call_id().is_none());
    }

    #[test]
    fn test_tool_result_tagged_with_call_id() {
        let msg = Message::tool_result("call_9", "{}");
        assert_eq!(msg.role(), Role::Tool);
        assert_eq!(msg.tool_call_id(), Some("call_9"));
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn test_messages_get_distinct_ids() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id(), b.id());
        assert_eq!(Role::Error.as_str(), "error");
    }
}
