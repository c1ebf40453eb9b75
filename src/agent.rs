//! 会话 Agent
//!
//! 一个 Agent 对应一个会话：持有会话状态、模型客户端、工具注册表与事件总线引用。
//! submit 在后台启动任务并返回句柄；同一会话内新任务启动前，旧任务会被取消并等待收尾，
//! 因此两个任务的事件不会交错。

use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::session_supervisor::{ActiveTask, CancelSignals, SessionSupervisor};
use crate::core::state::{lock_state, ConversationState, SharedState};
use crate::core::{AgentError, EventBus};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::{run_prompt, AgentEvent, ReactSession};
use crate::tools::ToolRegistry;

/// 后台任务句柄
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    signals: CancelSignals,
    outcome: oneshot::Receiver<Result<(), AgentError>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 协作式停止本任务
    pub fn request_stop(&self) {
        self.signals.request_stop();
    }

    /// 硬取消本任务（不等待）
    pub fn cancel(&self) {
        self.signals.cancel();
    }

    /// 等待任务结束；被硬取消时返回 `Err(AgentError::Cancelled)`
    pub async fn join(self) -> Result<(), AgentError> {
        match self.outcome.await {
            Ok(r) => r,
            Err(_) => Err(AgentError::Unexpected(format!("task {} aborted", self.task_id))),
        }
    }
}

pub struct Agent {
    conversation_id: String,
    state: SharedState,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    supervisor: SessionSupervisor,
}

impl Agent {
    pub fn new(
        conversation_id: impl Into<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        Self {
            state: ConversationState::new(conversation_id.clone(), system_prompt).shared(),
            conversation_id,
            llm,
            tools,
            bus,
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// 在后台启动一次提示处理；若已有任务在跑，先取消并等待其收尾
    pub async fn submit(self: &Arc<Self>, prompt: impl Into<String>) -> TaskHandle {
        let prompt = prompt.into();
        let mut slot = self.supervisor.slot().await;
        if let Some(previous) = slot.take() {
            tracing::debug!(conversation = %self.conversation_id, task_id = %previous.task_id, "replacing previous task");
            previous.cancel_and_wait().await;
        }

        let task_id = Uuid::new_v4().to_string();
        let signals = CancelSignals::new();
        let (tx, rx) = oneshot::channel();
        let handle = {
            let agent = Arc::clone(self);
            let task_id = task_id.clone();
            let signals = signals.clone();
            tokio::spawn(async move {
                let result = agent.run(&task_id, &prompt, &signals).await;
                let _ = tx.send(result);
            })
        };
        *slot = Some(ActiveTask::new(task_id.clone(), signals.clone(), handle));

        TaskHandle {
            task_id,
            signals,
            outcome: rx,
        }
    }

    /// 处理一次提示并等待完成
    pub async fn process_prompt(self: &Arc<Self>, prompt: impl Into<String>) -> Result<(), AgentError> {
        self.submit(prompt).await.join().await
    }

    /// 硬中断在跑任务：等待其收尾后发布 Interrupt 事件；没有在跑任务时返回 false
    pub async fn interrupt(&self) -> bool {
        let mut slot = self.supervisor.slot().await;
        match slot.take() {
            Some(task) if !task.is_finished() => {
                let task_id = task.task_id.clone();
                task.cancel_and_wait().await;
                tracing::info!(conversation = %self.conversation_id, task_id = %task_id, "task interrupted");
                self.bus
                    .publish(AgentEvent::interrupt(&self.conversation_id, &task_id));
                true
            }
            _ => false,
        }
    }

    /// 协作式停止：仅置标记，执行器在下一检查点静默结束
    pub async fn request_stop(&self) -> bool {
        self.supervisor.request_stop().await
    }

    pub fn history(&self) -> Vec<Message> {
        lock_state(&self.state).history().to_vec()
    }

    pub fn system_prompt(&self) -> String {
        lock_state(&self.state).system_prompt.clone()
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.state).running
    }

    pub fn current_task_id(&self) -> Option<String> {
        lock_state(&self.state).current_task_id.clone()
    }

    /// 清空历史；任务运行中拒绝
    pub fn clear_history(&self) -> Result<(), AgentError> {
        let mut state = lock_state(&self.state);
        if state.running {
            return Err(AgentError::Busy(self.conversation_id.clone()));
        }
        state.clear_history();
        Ok(())
    }

    async fn run(&self, task_id: &str, prompt: &str, signals: &CancelSignals) -> Result<(), AgentError> {
        let session = ReactSession {
            conversation_id: &self.conversation_id,
            state: &self.state,
            llm: self.llm.as_ref(),
            tools: self.tools.as_ref(),
            bus: self.bus.as_ref(),
            signals,
        };
        run_prompt(&session, task_id, prompt).await
    }
}
