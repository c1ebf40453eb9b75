//! OpenAI 兼容 API 客户端
//!
//! 直接走 chat/completions 线协议（reqwest + serde_json），可配置 base_url；
//! 有工具时附带 tools 与 tool_choice=auto，无工具时两个字段都不发送。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, ModelReply};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::tools::ToolSpec;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        max_tokens: u32,
        request_timeout_secs: u64,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.to_string(),
            max_tokens,
            usage: TokenUsage::default(),
        }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    fn build_request_body(&self, messages: &[Message], tools: Option<&[ToolSpec]>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": to_openai_messages(messages),
            "max_tokens": self.max_tokens,
        });
        if let (Some(tools), Some(obj)) = (tools, body.as_object_mut()) {
            let defs: Vec<Value> = tools.iter().map(ToolSpec::to_openai_tool).collect();
            obj.insert("tools".into(), Value::Array(defs));
            obj.insert("tool_choice".into(), Value::String("auto".into()));
        }
        body
    }
}

/// 历史消息转为 chat/completions 格式；error 角色不发给模型
pub fn to_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|m| match m.role() {
            Role::System | Role::User => Some(json!({
                "role": m.role().as_str(),
                "content": m.content(),
            })),
            Role::Assistant => {
                let calls = m.tool_calls();
                if calls.is_empty() {
                    Some(json!({ "role": "assistant", "content": m.content() }))
                } else {
                    let tool_calls: Vec<Value> = calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": { "name": tc.name, "arguments": tc.arguments },
                            })
                        })
                        .collect();
                    let content = if m.content().is_empty() {
                        Value::Null
                    } else {
                        Value::String(m.content().to_string())
                    };
                    Some(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }))
                }
            }
            Role::Tool => Some(json!({
                "role": "tool",
                "content": m.content(),
                "tool_call_id": m.tool_call_id().unwrap_or("unknown"),
            })),
            Role::Error => None,
        })
        .collect()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelReply, LlmError> {
        let body = self.build_request_body(messages, tools);
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let resp = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let data: ChatResponse = resp.json().await?;
        if let Some(usage) = &data.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        let choice = data.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest::new(tc.id, tc.function.name, tc.function.arguments))
            .collect();

        Ok(ModelReply::with_tool_calls(
            choice.message.content.unwrap_or_default(),
            tool_calls,
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Deserialize)]
struct ChatFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
