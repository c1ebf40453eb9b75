//! 工具注册表
//!
//! 所有工具实现 Tool trait（descriptor / run），由 ToolRegistry 按名注册；
//! 注册与授权是两套独立集合，只有同时在两者之中的工具才可被提供给模型并执行。
//! dispatch 时捕获处理器的错误与 panic，统一转为结构化失败，并输出一条审计日志。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::error::panic_payload;
use crate::core::AgentError;

/// 工具描述：启动时注册一次，进程生命周期内不变
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub dangerous: bool,
}

/// 提供给模型的工具声明
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    /// OpenAI function-calling 格式
    pub fn to_openai_tool(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

impl From<&ToolDescriptor> for ToolSpec {
    fn from(d: &ToolDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            description: d.description.clone(),
            parameters: d.input_schema.clone(),
        }
    }
}

/// 工具 trait：描述 + 异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// 执行工具；Err 会被注册表转为 `{success: false, error}`
    async fn run(&self, args: Value) -> Result<Value, String>;
}

/// dispatch 的结构化结果，序列化后作为 tool 消息内容
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<Result<Value, AgentError>> for ToolOutcome {
    fn from(r: Result<Value, AgentError>) -> Self {
        match r {
            Ok(v) => ToolOutcome::ok(v),
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}

struct Registered {
    descriptor: ToolDescriptor,
    handler: Arc<dyn Tool>,
}

/// 工具注册表：registered（名称 -> 描述 + 处理器）与 authorized（有序名称集合）
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Registered>>,
    authorized: RwLock<Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按名注册；同名后注册者覆盖
    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&self, handler: Arc<dyn Tool>) {
        let descriptor = handler.descriptor();
        tracing::debug!(tool = %descriptor.name, dangerous = descriptor.dangerous, "register tool");
        self.write_tools()
            .insert(descriptor.name.clone(), Registered { descriptor, handler });
    }

    /// 授权；幂等，无需先注册
    pub fn authorize(&self, name: &str) {
        let mut authorized = self.write_authorized();
        if !authorized.iter().any(|n| n == name) {
            authorized.push(name.to_string());
        }
    }

    pub fn is_authorized(&self, name: &str) -> bool {
        self.read_authorized().iter().any(|n| n == name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_tools().contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.read_tools().get(name).map(|r| r.descriptor.clone())
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_tools().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn authorized_names(&self) -> Vec<String> {
        self.read_authorized().clone()
    }

    /// 已注册且已授权的工具声明，按授权顺序
    pub fn list_specs_for_authorized(&self) -> Vec<ToolSpec> {
        let tools = self.read_tools();
        self.read_authorized()
            .iter()
            .filter_map(|name| tools.get(name))
            .map(|r| ToolSpec::from(&r.descriptor))
            .collect()
    }

    /// 执行工具：先校验授权，再查注册；处理器错误与 panic 均转为 ToolExecutionFailed
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        if !self.is_authorized(name) {
            tracing::warn!(tool = %name, "dispatch rejected: not authorized");
            return Err(AgentError::ToolNotAuthorized(name.to_string()));
        }
        let handler = self
            .read_tools()
            .get(name)
            .map(|r| Arc::clone(&r.handler))
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = match AssertUnwindSafe(handler.run(args)).catch_unwind().await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(panic) => Err(AgentError::ToolExecutionFailed(panic_message(panic.as_ref()))),
        };

        let audit = json!({
            "event": "tool_audit",
            "tool": name,
            "ok": result.is_ok(),
            "outcome": if result.is_ok() { "ok" } else { "error" },
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");
        result
    }

    fn read_tools(&self) -> RwLockReadGuard<'_, HashMap<String, Registered>> {
        self.tools.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_tools(&self) -> RwLockWriteGuard<'_, HashMap<String, Registered>> {
        self.tools.write().unwrap_or_else(|p| p.into_inner())
    }

    fn read_authorized(&self) -> RwLockReadGuard<'_, Vec<String>> {
        self.authorized.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_authorized(&self) -> RwLockWriteGuard<'_, Vec<String>> {
        self.authorized.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    match panic_payload(panic) {
        Some(text) => format!("tool panicked: {}", text),
        None => "tool panicked".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTool {
        name: &'static str,
        mode: &'static str,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: self.name.to_string(),
                description: format!("{} tool", self.mode),
                input_schema: json!({"type": "object"}),
                dangerous: false,
            }
        }

        async fn run(&self, args: Value) -> Result<Value, String> {
            match self.mode {
                "fail" => Err("handler failed".to_string()),
                "panic" => panic!("handler exploded"),
                _ => Ok(json!({ "echo": args })),
            }
        }
    }

    fn tool(name: &'static str, mode: &'static str) -> StaticTool {
        StaticTool { name, mode }
    }

    #[tokio::test]
    async fn test_registered_but_not_authorized() {
        let reg = ToolRegistry::new();
        reg.register(tool("x", "ok"));
        let err = reg.dispatch("x", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotAuthorized(n) if n == "x"));
    }

    #[tokio::test]
    async fn test_authorized_but_not_registered() {
        let reg = ToolRegistry::new();
        reg.authorize("x");
        let err = reg.dispatch("x", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(n) if n == "x"));
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_contained() {
        let reg = ToolRegistry::new();
        reg.register(tool("bad", "fail"));
        reg.register(tool("boom", "panic"));
        reg.authorize("bad");
        reg.authorize("boom");

        let outcome = ToolOutcome::from(reg.dispatch("bad", json!({})).await);
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Tool execution failed: handler failed"));

        let err = reg.dispatch("boom", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(m) if m.contains("handler exploded")));
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let reg = ToolRegistry::new();
        reg.register(tool("x", "ok"));
        reg.authorize("x");
        let outcome = ToolOutcome::from(reg.dispatch("x", json!({"a": 1})).await);
        assert_eq!(outcome.to_value(), json!({"success": true, "result": {"echo": {"a": 1}}}));
    }

    #[test]
    fn test_specs_follow_authorization_order_and_skip_unregistered() {
        let reg = ToolRegistry::new();
        reg.register(tool("a", "ok"));
        reg.register(tool("b", "ok"));
        reg.authorize("b");
        reg.authorize("ghost");
        reg.authorize("a");
        reg.authorize("b");

        let names: Vec<String> = reg.list_specs_for_authorized().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(reg.authorized_names(), vec!["b", "ghost", "a"]);
    }

    #[test]
    fn test_last_registration_wins() {
        let reg = ToolRegistry::new();
        reg.register(tool("x", "ok"));
        reg.register(tool("x", "fail"));
        assert_eq!(reg.descriptor("x").unwrap().description, "fail tool");
        assert_eq!(reg.tool_names(), vec!["x"]);
    }
}
