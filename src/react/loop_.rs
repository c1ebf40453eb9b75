//! 任务执行器：一次用户提示的完整处理
//!
//! UserPrompt -> 模型调用 -> AgentReply -> (ToolRequest -> ToolResult)* 。
//! 每轮只调用一次模型；工具结果写入历史后本任务结束，不再把结果回喂模型
//! （MAX_MODEL_ROUNDS 控制轮数）。
//! 协作式停止在模型返回后与每个工具调用前检查；硬取消打断任一挂起点。
//! 无论哪条路径退出，running 与 current_task_id 都会被复位。

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::Value;

use crate::core::error::panic_payload;
use crate::core::session_supervisor::CancelSignals;
use crate::core::state::{lock_state, SharedState};
use crate::core::{AgentError, EventBus};
use crate::llm::LlmClient;
use crate::memory::{Message, ToolCallRequest};
use crate::react::AgentEvent;
use crate::tools::{ToolOutcome, ToolRegistry};

/// 每个任务的模型调用轮数
pub const MAX_MODEL_ROUNDS: usize = 1;

/// 执行器依赖（借用自 Agent）
pub struct ReactSession<'a> {
    pub conversation_id: &'a str,
    pub state: &'a SharedState,
    pub llm: &'a dyn LlmClient,
    pub tools: &'a ToolRegistry,
    pub bus: &'a EventBus,
    pub signals: &'a CancelSignals,
}

/// 任务结束时复位运行标记（含 panic 展开路径）
struct RunGuard<'a> {
    state: &'a SharedState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        lock_state(self.state).finish_task();
    }
}

/// 处理一次用户提示
///
/// 模型失败与意外错误以 Error 事件报告，任务正常结束（返回 Ok）；
/// 硬取消发布 "Task was cancelled" 后返回 `Err(AgentError::Cancelled)`。
pub async fn run_prompt(session: &ReactSession<'_>, task_id: &str, prompt: &str) -> Result<(), AgentError> {
    {
        let mut state = lock_state(session.state);
        state.begin_task(task_id);
        state.append(Message::user(prompt));
    }
    let _guard = RunGuard { state: session.state };
    session
        .bus
        .publish(AgentEvent::user_prompt(session.conversation_id, task_id, prompt));
    tracing::info!(conversation = %session.conversation_id, task_id, "task started");

    let body = AssertUnwindSafe(run_rounds(session, task_id)).catch_unwind();
    let outcome = tokio::select! {
        biased;
        _ = session.signals.token().cancelled() => Err(AgentError::Cancelled),
        r = body => match r {
            Ok(r) => r,
            Err(panic) => Err(AgentError::Unexpected(
                panic_payload(panic.as_ref()).unwrap_or("task panicked").to_string(),
            )),
        },
    };

    match outcome {
        Ok(()) => {
            tracing::info!(conversation = %session.conversation_id, task_id, "task finished");
            Ok(())
        }
        Err(AgentError::Cancelled) => {
            tracing::info!(conversation = %session.conversation_id, task_id, "task cancelled");
            session.bus.publish(AgentEvent::error(
                session.conversation_id,
                Some(task_id),
                AgentError::Cancelled.to_string(),
            ));
            Err(AgentError::Cancelled)
        }
        Err(e) => {
            tracing::warn!(conversation = %session.conversation_id, task_id, error = %e, "task failed");
            session
                .bus
                .publish(AgentEvent::error(session.conversation_id, Some(task_id), e.to_string()));
            Ok(())
        }
    }
}

async fn run_rounds(session: &ReactSession<'_>, task_id: &str) -> Result<(), AgentError> {
    for round in 0..MAX_MODEL_ROUNDS {
        let messages = lock_state(session.state).model_input();
        let specs = session.tools.list_specs_for_authorized();
        let tools = if specs.is_empty() { None } else { Some(specs.as_slice()) };

        tracing::debug!(round, messages = messages.len(), tools = specs.len(), "calling model");
        let reply = session.llm.complete(&messages, tools).await;
        if session.signals.is_stop_requested() {
            tracing::debug!(task_id, "stop requested after model call");
            return Ok(());
        }
        let reply = reply?;

        let calls = reply.tool_calls.clone();
        let message = reply.into_message();
        lock_state(session.state).append(message.clone());
        session
            .bus
            .publish(AgentEvent::agent_reply(session.conversation_id, task_id, message));

        if calls.is_empty() {
            return Ok(());
        }
        if !run_tool_calls(session, task_id, &calls).await {
            return Ok(());
        }
    }
    Ok(())
}

/// 按顺序执行工具调用；被协作式停止时返回 false
async fn run_tool_calls(session: &ReactSession<'_>, task_id: &str, calls: &[ToolCallRequest]) -> bool {
    for call in calls {
        if session.signals.is_stop_requested() {
            tracing::debug!(task_id, tool_call_id = %call.id, "stop requested before tool call");
            return false;
        }

        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool arguments rejected");
                record_tool_result(session, task_id, &call.id, ToolOutcome::failure(e.to_string()));
                continue;
            }
        };

        session.bus.publish(AgentEvent::tool_request(
            session.conversation_id,
            task_id,
            &call.name,
            args.clone(),
            &call.id,
        ));
        let outcome = ToolOutcome::from(session.tools.dispatch(&call.name, args).await);
        record_tool_result(session, task_id, &call.id, outcome);
    }
    true
}

fn record_tool_result(session: &ReactSession<'_>, task_id: &str, call_id: &str, outcome: ToolOutcome) {
    let result = outcome.to_value();
    let content = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
    lock_state(session.state).append(Message::tool_result(call_id, content));
    session
        .bus
        .publish(AgentEvent::tool_result(session.conversation_id, task_id, call_id, result));
}

/// 解析工具参数：必须是 JSON 对象（空串同样无效）
pub fn parse_arguments(raw: &str) -> Result<Value, AgentError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(AgentError::ToolArgumentInvalid("expected a JSON object".to_string())),
        Err(e) => Err(AgentError::ToolArgumentInvalid(e.to_string())),
    }
}
