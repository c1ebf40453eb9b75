//! Agent 错误类型
//!
//! 单次工具调用内的失败（参数、授权、未注册、执行）不会中止本轮其余调用；
//! 任务级失败（模型失败、取消、未预期错误）一律先走清理再返回。

use std::any::Any;

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 模型调用方报告失败：发布一次 Error 事件，本次任务结束，不重试
    #[error("LLM error: {0}")]
    ModelFailure(#[from] LlmError),

    #[error("invalid arguments: {0}")]
    ToolArgumentInvalid(String),

    #[error("Tool '{0}' is not authorized")]
    ToolNotAuthorized(String),

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// 硬取消：发布一次 Error 事件后向调用方返回，与其他失败区分
    #[error("Task was cancelled")]
    Cancelled,

    #[error("Agent error: {0}")]
    Unexpected(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Conversation busy: {0}")]
    Busy(String),
}

impl AgentError {
    /// 是否为硬取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

/// 取出 panic 载荷中的文本（&str 或 String），其他类型返回 None
pub(crate) fn panic_payload(panic: &(dyn Any + Send)) -> Option<&str> {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
}
