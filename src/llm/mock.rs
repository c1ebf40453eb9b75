//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按脚本依次返回预设结果；脚本耗尽后回显最后一条 User 消息。
//! 可选闸门（gate）让调用挂起，直到测试显式放行，用于验证取消语义。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::llm::{LlmClient, LlmError, ModelReply};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::tools::ToolSpec;

/// 一次被记录的模型调用
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolSpec>>,
}

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ModelReply, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    gated: bool,
    gate: Notify,
    started: Notify,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用都挂起，直到 release() 放行
    pub fn gated() -> Self {
        Self {
            gated: true,
            ..Self::default()
        }
    }

    pub fn push_reply(&self, reply: ModelReply) -> &Self {
        self.lock_script().push_back(Ok(reply));
        self
    }

    pub fn push_text(&self, content: impl Into<String>) -> &Self {
        self.push_reply(ModelReply::text(content))
    }

    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>) -> &Self {
        self.push_reply(ModelReply::with_tool_calls("", calls))
    }

    pub fn push_failure(&self, error: impl Into<String>) -> &Self {
        self.lock_script().push_back(Err(error.into()));
        self
    }

    /// 放行一次被挂起的调用（先放行也会保留许可）
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// 等待下一次调用进入 complete
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ModelReply, String>>> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelReply, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                tools: tools.map(|t| t.to_vec()),
            });
        }
        self.started.notify_one();
        if self.gated {
            self.gate.notified().await;
        }

        let scripted = self.lock_script().pop_front();
        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(LlmError::Other(e)),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role() == Role::User)
                    .map(|m| m.content())
                    .unwrap_or("(no input)");
                Ok(ModelReply::text(format!("Echo: {}", last_user)))
            }
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::new();
        mock.push_text("scripted").push_failure("boom");

        let msgs = vec![Message::user("hello")];
        assert_eq!(mock.complete(&msgs, None).await.unwrap().content, "scripted");
        assert!(mock.complete(&msgs, None).await.is_err());
        assert_eq!(mock.complete(&msgs, None).await.unwrap().content, "Echo: hello");
        assert_eq!(mock.calls().len(), 3);
        assert!(mock.calls()[0].tools.is_none());
    }
}
