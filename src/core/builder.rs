//! Agent 构建器：按配置组装模型客户端、工具注册表与事件总线
//!
//! 所有会话共享同一套组件；测试可通过 with_llm 注入 Mock 客户端。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{AgentRuntime, EventBus};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::tools::{CommandPolicy, FileReadTool, FileWriteTool, ShellRunTool, ToolRegistry};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
                cfg.llm.max_tokens,
                cfg.llm.timeouts.request,
            ))
        }
        ("openai", None) => {
            tracing::warn!("OPENAI_API_KEY not set, falling back to mock LLM");
            Arc::new(MockLlmClient::new())
        }
        _ => {
            tracing::info!("Using mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    workspace: PathBuf,
    llm: Option<Arc<dyn LlmClient>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        let workspace = config.app.workspace_root();
        Self {
            config,
            workspace,
            llm: None,
        }
    }

    pub fn with_workspace(mut self, workspace: impl AsRef<Path>) -> Self {
        self.workspace = workspace.as_ref().to_path_buf();
        self
    }

    /// 注入模型客户端，替代按配置创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// 注册内置工具并按配置授权
    pub fn build_tool_registry(&self) -> ToolRegistry {
        if let Err(e) = std::fs::create_dir_all(&self.workspace) {
            tracing::warn!(workspace = %self.workspace.display(), error = %e, "failed to create workspace");
        }

        let shell_cfg = &self.config.tools.shell;
        let policy = CommandPolicy::new(
            shell_cfg.allowed_commands.clone(),
            shell_cfg.denied_commands.clone(),
        );

        let tools = ToolRegistry::new();
        tools.register(
            ShellRunTool::new(policy, &self.workspace)
                .with_default_timeout(Duration::from_secs(shell_cfg.default_timeout_secs))
                .with_kill_grace(Duration::from_secs(shell_cfg.kill_grace_secs))
                .with_max_output_bytes(shell_cfg.max_output_bytes),
        );
        tools.register(
            FileReadTool::new(&self.workspace).with_default_max_bytes(self.config.tools.fs.max_read_bytes),
        );
        tools.register(FileWriteTool::new(&self.workspace));

        for name in &self.config.tools.authorized {
            if !tools.is_registered(name) {
                tracing::warn!(tool = %name, "authorized tool is not registered");
            }
            tools.authorize(name);
        }
        tools
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => create_llm_from_config(&self.config),
        }
    }

    pub fn build_event_bus(&self) -> EventBus {
        EventBus::new(self.config.events.subscriber_capacity)
    }

    /// 构建多会话运行时
    pub fn build(self) -> AgentRuntime {
        let tools = Arc::new(self.build_tool_registry());
        let llm = self.build_llm();
        let bus = Arc::new(self.build_event_bus());
        AgentRuntime::new(llm, tools, bus, self.config.app.system_prompt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.tools.authorized = vec!["fs_read".into(), "ghost".into()];

        let tools = AgentBuilder::new(cfg).with_workspace(dir.path()).build_tool_registry();
        assert_eq!(tools.tool_names(), vec!["fs_read", "fs_write", "shell_run"]);
        assert!(tools.is_authorized("fs_read"));
        assert!(!tools.is_authorized("shell_run"));
        let specs = tools.list_specs_for_authorized();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "fs_read");
    }

    #[test]
    fn test_mock_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        assert_eq!(create_llm_from_config(&cfg).model_name(), "mock");
    }
}
