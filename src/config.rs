//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RYAGENT__*` 覆盖（双下划线表示嵌套，如 `RYAGENT__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::error::AgentError;
use crate::core::event_bus::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::tools::filesystem::{DEFAULT_MAX_READ_BYTES, READ_TOOL_NAME, WRITE_TOOL_NAME};
use crate::tools::shell::{
    DEFAULT_KILL_GRACE_SECS, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS, SHELL_TOOL_NAME,
};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding and ops agent.";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub events: EventsSection,
}

/// [app] 段：应用名、沙箱根目录、默认系统提示
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    pub system_prompt: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AppSection {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("./workspace"))
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock；没有 OPENAI_API_KEY 时总是 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            max_tokens: 4096,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [tools] 段：授权列表与各工具参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 启动时授权的工具名（按此顺序提供给模型）
    pub authorized: Vec<String>,
    pub shell: ShellSection,
    pub fs: FsSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            authorized: vec![
                SHELL_TOOL_NAME.into(),
                READ_TOOL_NAME.into(),
                WRITE_TOOL_NAME.into(),
            ],
            shell: ShellSection::default(),
            fs: FsSection::default(),
        }
    }
}

/// [tools.shell] 段：按首词过滤命令；allowed 为空表示不限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
    pub denied_commands: Vec<String>,
    pub default_timeout_secs: u64,
    /// 超时后 SIGTERM 到强制 kill 的宽限期
    pub kill_grace_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: ["python", "uv", "ls", "cat", "rg", "git", "pytest"]
                .into_iter()
                .map(String::from)
                .collect(),
            denied_commands: ["rm", "shutdown", "reboot", "mkfs", "dd", "fdisk"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            kill_grace_secs: DEFAULT_KILL_GRACE_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FsSection {
    pub max_read_bytes: usize,
}

impl Default for FsSection {
    fn default() -> Self {
        Self {
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

/// [events] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// EventBus::subscribe 创建的订阅队列容量
    pub subscriber_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// 从 config 目录加载配置，环境变量 RYAGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 RYAGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RYAGENT")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tools.authorized")
            .with_list_parse_key("tools.shell.allowed_commands")
            .with_list_parse_key("tools.shell.denied_commands")
            .try_parsing(true),
    );

    Ok(builder.build()?.try_deserialize()?)
}

/// 加载失败时告警并使用默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.app.workspace_root(), PathBuf::from("./workspace"));
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.tools.authorized, vec!["shell_run", "fs_read", "fs_write"]);
        assert!(cfg.tools.shell.denied_commands.contains(&"rm".to_string()));
        assert_eq!(cfg.tools.shell.kill_grace_secs, 5);
        assert_eq!(cfg.tools.fs.max_read_bytes, 65536);
        assert_eq!(cfg.events.subscriber_capacity, 100);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[tools]\nauthorized = [\"fs_read\"]\n\n[tools.shell]\nallowed_commands = []\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.tools.authorized, vec!["fs_read"]);
        assert!(cfg.tools.shell.allowed_commands.is_empty());
        assert_eq!(cfg.tools.shell.default_timeout_secs, 60);
        assert_eq!(cfg.llm.timeouts.request, 60);
    }

    #[test]
    fn test_malformed_value_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[llm]\nmax_tokens = \"lots\"\n").unwrap();

        let err = load_config(Some(path.clone())).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert!(err.to_string().starts_with("Config error:"));

        // 回退路径仍给出默认值
        assert_eq!(load_config_or_default(Some(path)).llm.max_tokens, 4096);
    }
}
