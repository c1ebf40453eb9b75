//! 模型调用能力抽象
//!
//! 执行器只依赖 LlmClient：输入有序消息列表与可选工具列表，输出纯文本回复、
//! 带工具调用请求的回复，或一个带描述的失败。流式变体为增强能力，状态机不使用。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;

use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolSpec;

/// 模型调用失败
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("no choices in response")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

/// 模型一次调用的成功结果；tool_calls 为空表示纯文本回复
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 转为写入历史的 assistant 消息
    pub fn into_message(self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            Message::assistant_with_tool_calls(self.content, &self.tool_calls)
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；tools 为 None 时请求中不携带工具字段
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelReply, LlmError>;

    /// 流式完成，默认把非流式结果作为单个分片返回
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<TokenStream, LlmError> {
        let reply = self.complete(messages, tools).await?;
        Ok(Box::pin(stream::iter(vec![Ok(reply.content)])))
    }

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }
}
