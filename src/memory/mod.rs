//! 记忆层：会话消息模型（仅进程内，不做持久化）

pub mod conversation;

pub use conversation::{Message, Role, ToolCallRequest, TOOL_CALLS_KEY, TOOL_CALL_ID_KEY};
