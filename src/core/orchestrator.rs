//! 多会话运行时
//!
//! 每个会话一个 Agent；所有会话共享同一模型客户端、工具注册表与事件总线。
//! 会话之间的任务互不影响，可并发运行。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::agent::{Agent, TaskHandle};
use crate::core::{AgentError, EventBus};
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    default_system_prompt: String,
    conversations: RwLock<HashMap<String, Arc<Agent>>>,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        bus: Arc<EventBus>,
        default_system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tools,
            bus,
            default_system_prompt: default_system_prompt.into(),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 创建会话；id 为空时生成 UUID，已存在则返回原会话
    pub fn create_conversation(&self, id: Option<&str>, system_prompt: Option<&str>) -> Arc<Agent> {
        let id = id
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut conversations = self.write_conversations();
        if let Some(existing) = conversations.get(&id) {
            return Arc::clone(existing);
        }

        let agent = Arc::new(Agent::new(
            id.clone(),
            system_prompt.unwrap_or(self.default_system_prompt.as_str()),
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
            Arc::clone(&self.bus),
        ));
        tracing::info!(conversation = %id, "conversation created");
        conversations.insert(id, Arc::clone(&agent));
        agent
    }

    pub fn conversation(&self, id: &str) -> Option<Arc<Agent>> {
        self.read_conversations().get(id).cloned()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read_conversations().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 移除会话：先中断在跑任务，再丢弃其事件队列
    pub async fn remove_conversation(&self, id: &str) -> bool {
        let removed = self.write_conversations().remove(id);
        match removed {
            Some(agent) => {
                agent.interrupt().await;
                self.bus.remove_conversation(id);
                tracing::info!(conversation = %id, "conversation removed");
                true
            }
            None => false,
        }
    }

    pub async fn submit(&self, id: &str, prompt: impl Into<String>) -> Result<TaskHandle, AgentError> {
        let agent = self.require(id)?;
        Ok(agent.submit(prompt).await)
    }

    pub async fn interrupt(&self, id: &str) -> Result<bool, AgentError> {
        let agent = self.require(id)?;
        Ok(agent.interrupt().await)
    }

    fn require(&self, id: &str) -> Result<Arc<Agent>, AgentError> {
        self.conversation(id)
            .ok_or_else(|| AgentError::ConversationNotFound(id.to_string()))
    }

    fn read_conversations(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Agent>>> {
        self.conversations.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_conversations(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Agent>>> {
        self.conversations.write().unwrap_or_else(|p| p.into_inner())
    }
}
